// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attribute map of a message element.
//!
//! Keys compare ASCII case-insensitively. Values are always stored as text;
//! typed setters format on write and typed getters parse on read.

/// Boolean grammar shared by every boolean attribute: `"true"` (any case) or
/// `"1"` is true, anything else is false.
pub fn str_to_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Case-insensitive string equality used for element and attribute names.
pub fn string_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Ordered attribute map with case-insensitive keys.
///
/// Enumeration order is insertion order; overwriting a value keeps the key's
/// original position and spelling.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| string_equal(k, key))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Insert or overwrite. Returns `true` when the stored value changed.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.position(key) {
            Some(i) if self.entries[i].1 == value => false,
            Some(i) => {
                self.entries[i].1 = value;
                true
            }
            None => {
                self.entries.push((key.to_string(), value));
                true
            }
        }
    }

    /// Append without looking for an existing key. The caller guarantees
    /// `key` is not present yet.
    pub(crate) fn push_unique(&mut self, key: String, value: String) {
        self.entries.push((key, value));
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key at `index` in enumeration order.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Equality is set equality: same keys (case-insensitive) with identical values.
impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for Attributes {}
