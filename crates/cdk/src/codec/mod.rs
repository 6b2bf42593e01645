// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec.
//!
//! - [`wire`]: the byte-exact element encoding (fixed buffer in, fixed buffer out)
//! - [`stream`]: chunked export and pull-based import over the same bytes
//! - [`frame`]: length-prefix framing used on TCP links
//!
//! The codec is reached through [`Message`](crate::Message) methods
//! (`export_*` / `import_*`); the modules expose the format constants.

pub mod frame;
pub mod stream;
pub mod wire;

pub use frame::{FrameCodec, DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_SIZE};
pub use stream::{ExportChunks, PullReader};
pub use wire::{MAX_DEPTH, WIRE_VERSION};
