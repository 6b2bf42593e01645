// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Glue around the external comparison engines.
//!
//! Two engines ship separately from the toolkit and are consumed as black
//! boxes producing a score:
//!
//! - a vehicle signature comparer, plugged in through [`SignatureComparer`]
//! - a plate fingerprint engine, plugged in through [`FingerprintEngine`] and
//!   driven by [`PlateFingerprintMatcher`]
//!
//! # Dictionary lifecycle
//!
//! ```text
//!   set_dictionary(saved) ──► start() ──► match_*() ──► engine update ──► save callback
//!          (optional)            │                                            │
//!                                └── no dictionary: learning phase ◄──────────┘
//! ```
//!
//! The dictionary is an opaque byte blob. The application persists whatever
//! the save callback hands it and supplies it again at the next startup;
//! without it the engine starts over in its learning phase.

use crate::error::{Error, ErrorSlot, LastError, Result};
use parking_lot::Mutex;
use std::fmt;

/// Lowest signature comparison score.
pub const MIN_SIGNATURE_SCORE: u32 = 0;

/// Highest signature comparison score (identical vehicles).
pub const MAX_SIGNATURE_SCORE: u32 = 10;

// ============================================================================
// Signatures
// ============================================================================

/// Signature of one vehicle, as produced by the equipment.
#[derive(Clone)]
pub struct Signature {
    bytes: Vec<u8>,
    last_error: ErrorSlot,
}

impl Signature {
    /// Wrap a signature buffer. Fails on an empty buffer.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidArgument("empty signature".into()));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            last_error: ErrorSlot::default(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature").field("len", &self.bytes.len()).finish()
    }
}

impl LastError for Signature {
    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }
}

/// Signature comparison engine.
pub trait SignatureComparer: Send + Sync {
    /// Score the pair between 0 and 10, 10 being the best match.
    ///
    /// `min_score` is a hint: the engine may stop early and report any
    /// score below it once it knows the pair cannot reach it.
    fn compare(
        &self,
        first: &Signature,
        second: &Signature,
        min_score: Option<u32>,
    ) -> std::result::Result<u32, String>;
}

impl<F> SignatureComparer for F
where
    F: Fn(&Signature, &Signature, Option<u32>) -> std::result::Result<u32, String> + Send + Sync,
{
    fn compare(
        &self,
        first: &Signature,
        second: &Signature,
        min_score: Option<u32>,
    ) -> std::result::Result<u32, String> {
        self(first, second, min_score)
    }
}

/// Compare two signatures with `comparer`.
///
/// Failures are recorded on `first`.
pub fn compare_signatures<C>(
    comparer: &C,
    first: &Signature,
    second: &Signature,
    min_score: Option<u32>,
) -> Result<u32>
where
    C: SignatureComparer + ?Sized,
{
    if let Some(min) = min_score {
        if min > MAX_SIGNATURE_SCORE {
            return first.last_error.fail(Error::InvalidArgument(format!(
                "minimum score {} above {}",
                min, MAX_SIGNATURE_SCORE
            )));
        }
    }
    match comparer.compare(first, second, min_score) {
        Ok(score) if score <= MAX_SIGNATURE_SCORE => Ok(score),
        Ok(score) => first.last_error.fail(Error::InvalidState(format!(
            "comparer returned out-of-range score {}",
            score
        ))),
        Err(reason) => first
            .last_error
            .fail(Error::InvalidArgument(format!("signature comparison failed: {}", reason))),
    }
}

// ============================================================================
// Plate fingerprints
// ============================================================================

/// Plate fingerprint comparison engine.
pub trait FingerprintEngine: Send {
    /// Prepare the engine. `dictionary` is `None` when the engine must learn.
    fn load(&mut self, dictionary: Option<&[u8]>) -> std::result::Result<(), String>;

    /// Raw similarity score of two fingerprints.
    fn score(&mut self, first: &[u8], second: &[u8]) -> std::result::Result<f32, String>;

    /// Whether `score` means both fingerprints describe the same plate.
    fn is_match(&self, score: f32) -> bool;

    /// Dictionary produced since the last call, if it changed.
    fn take_dictionary_update(&mut self) -> Option<Vec<u8>>;
}

/// Receives each new dictionary. Returns `false` when it could not be saved.
///
/// Runs on the matching thread, with the matcher locked: it must not call
/// back into the matcher.
pub type SaveDictionaryCallback = Box<dyn FnMut(&[u8]) -> bool + Send>;

struct MatcherState<E> {
    engine: E,
    dictionary: Option<Vec<u8>>,
    started: bool,
    learning: bool,
    save: Option<SaveDictionaryCallback>,
}

/// Plate fingerprint matcher wrapping an external engine.
pub struct PlateFingerprintMatcher<E: FingerprintEngine> {
    state: Mutex<MatcherState<E>>,
    last_error: ErrorSlot,
}

impl<E: FingerprintEngine> PlateFingerprintMatcher<E> {
    pub fn new(engine: E) -> Self {
        Self {
            state: Mutex::new(MatcherState {
                engine,
                dictionary: None,
                started: false,
                learning: true,
                save: None,
            }),
            last_error: ErrorSlot::default(),
        }
    }

    /// Supply a previously saved dictionary. Only allowed before `start`.
    pub fn set_dictionary(&self, dictionary: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return self.last_error.fail(Error::MatcherStarted);
        }
        if dictionary.is_empty() {
            return self
                .last_error
                .fail(Error::InvalidArgument("empty dictionary".into()));
        }
        state.dictionary = Some(dictionary.to_vec());
        Ok(())
    }

    pub fn set_save_dictionary_callback<F>(&self, callback: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.state.lock().save = Some(Box::new(callback));
    }

    pub fn clear_save_dictionary_callback(&self) {
        self.state.lock().save = None;
    }

    /// Load the dictionary into the engine and allow matching.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return self.last_error.fail(Error::MatcherStarted);
        }
        let MatcherState {
            engine, dictionary, ..
        } = &mut *state;
        if let Err(reason) = engine.load(dictionary.as_deref()) {
            return self
                .last_error
                .fail(Error::InvalidState(format!("fingerprint engine refused to start: {}", reason)));
        }
        state.learning = state.dictionary.is_none();
        state.started = true;
        if state.learning {
            log::info!("[matcher] started without dictionary, learning phase");
        } else {
            log::debug!(
                "[matcher] started with a {} byte dictionary",
                state.dictionary.as_ref().map_or(0, Vec::len)
            );
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// `true` until the engine works from a dictionary.
    pub fn is_learning(&self) -> bool {
        self.state.lock().learning
    }

    /// Whether both fingerprints describe the same plate.
    pub fn match_fingerprints(&self, first: &[u8], second: &[u8]) -> Result<bool> {
        self.run(first, second, |engine, score| engine.is_match(score))
    }

    /// Raw engine score for the pair.
    pub fn match_score(&self, first: &[u8], second: &[u8]) -> Result<f32> {
        self.run(first, second, |_, score| score)
    }

    fn run<T>(&self, first: &[u8], second: &[u8], finish: impl FnOnce(&E, f32) -> T) -> Result<T> {
        if first.is_empty() || second.is_empty() {
            return self
                .last_error
                .fail(Error::InvalidArgument("empty fingerprint".into()));
        }
        let mut state = self.state.lock();
        if !state.started {
            return self.last_error.fail(Error::MatcherNotStarted);
        }
        let score = match state.engine.score(first, second) {
            Ok(score) => score,
            Err(reason) => {
                return self
                    .last_error
                    .fail(Error::InvalidArgument(format!("fingerprint comparison failed: {}", reason)))
            }
        };
        Self::flush_dictionary(&mut state);
        Ok(finish(&state.engine, score))
    }

    fn flush_dictionary(state: &mut MatcherState<E>) {
        let Some(update) = state.engine.take_dictionary_update() else {
            return;
        };
        if state.learning {
            log::info!("[matcher] dictionary learned ({} bytes)", update.len());
        }
        state.learning = false;
        if let Some(save) = state.save.as_mut() {
            if !save(&update) {
                log::warn!("[matcher] save callback failed to store the dictionary");
            }
        }
        state.dictionary = Some(update);
    }
}

impl<E: FingerprintEngine> fmt::Debug for PlateFingerprintMatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PlateFingerprintMatcher")
            .field("started", &state.started)
            .field("learning", &state.learning)
            .field("dictionary_len", &state.dictionary.as_ref().map(Vec::len))
            .finish()
    }
}

impl<E: FingerprintEngine> LastError for PlateFingerprintMatcher<E> {
    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }
}
