// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message element: one node of the hierarchical message tree.
//!
//! ```text
//! Element "Status"
//! ├── attributes  { id="12", lane="2" }    (case-insensitive keys)
//! ├── content     [u8; n]                  (opaque, may be empty)
//! └── children    [Element "Plate", Element "Image", ...]
//! ```
//!
//! # Ownership
//!
//! A parent owns its children by value. Attaching (`add_child`) moves the
//! element in, so an element can never have two owners; detaching
//! (`detach_child`) moves it back out to the caller. Dropping an element
//! drops its whole subtree. Parent links are not stored: navigation goes
//! from the root down through borrows.

use super::attribute::{str_to_bool, string_equal, Attributes};
use super::merge::{self, MergeOutcome};
use crate::error::{Error, ErrorSlot, LastError, Result};
use std::fmt::Display;
use std::str::FromStr;

/// A named node with attributes, binary content and ordered children.
#[derive(Clone, Debug)]
pub struct Element {
    name: String,
    attributes: Attributes,
    content: Vec<u8>,
    children: Vec<Element>,
    last_error: ErrorSlot,
}

impl Element {
    /// Create an unattached element. Fails on an empty name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("element name is empty".into()));
        }
        Ok(Self::named(name))
    }

    /// Caller guarantees `name` is not empty.
    pub(crate) fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
            content: Vec::new(),
            children: Vec::new(),
            last_error: ErrorSlot::default(),
        }
    }

    /// Deep copy: a new, unattached tree owned by the caller.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    // ========================================================================
    // Name
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return self
                .last_error
                .fail(Error::InvalidArgument("element name is empty".into()));
        }
        self.name = name;
        Ok(())
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        string_equal(&self.name, name)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        if key.is_empty() {
            return self
                .last_error
                .fail(Error::InvalidArgument("attribute key is empty".into()));
        }
        self.attributes.set(key, value);
        Ok(())
    }

    fn set_formatted(&mut self, key: &str, value: impl Display) -> Result<()> {
        self.set_attribute(key, value.to_string())
    }

    pub fn set_attribute_i32(&mut self, key: &str, value: i32) -> Result<()> {
        self.set_formatted(key, value)
    }

    pub fn set_attribute_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.set_formatted(key, value)
    }

    pub fn set_attribute_i64(&mut self, key: &str, value: i64) -> Result<()> {
        self.set_formatted(key, value)
    }

    pub fn set_attribute_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.set_formatted(key, value)
    }

    pub fn set_attribute_f64(&mut self, key: &str, value: f64) -> Result<()> {
        self.set_formatted(key, value)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.attributes.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// `None` when missing or not a valid `i32`.
    pub fn attribute_i32(&self, key: &str) -> Option<i32> {
        self.parsed(key)
    }

    pub fn attribute_u32(&self, key: &str) -> Option<u32> {
        self.parsed(key)
    }

    pub fn attribute_i64(&self, key: &str) -> Option<i64> {
        self.parsed(key)
    }

    /// `None` when missing, otherwise [`str_to_bool`] of the stored text.
    pub fn attribute_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).map(str_to_bool)
    }

    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        self.parsed(key)
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Attribute key at `index`; stable while the element is not modified.
    pub fn attribute_name(&self, index: usize) -> Option<&str> {
        self.attributes.name(index)
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Replace the content with a copy of `bytes`.
    pub fn set_content(&mut self, bytes: &[u8]) {
        self.content.clear();
        self.content.extend_from_slice(bytes);
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_size(&self) -> usize {
        self.content.len()
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// Attach `child` as the last child and return a handle to it.
    pub fn add_child(&mut self, child: Element) -> &mut Element {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Element> {
        self.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Element> {
        self.children.get_mut(index)
    }

    /// Children whose name matches `name`, or all children for `None`.
    pub fn children_named<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children
            .iter()
            .filter(move |c| name.map_or(true, |n| c.is_named(n)))
    }

    pub fn child_count(&self, name: Option<&str>) -> usize {
        self.children_named(name).count()
    }

    pub fn first_child(&self, name: Option<&str>) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| name.map_or(true, |n| c.is_named(n)))
    }

    pub fn first_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.is_named(name))
    }

    /// Next sibling of `current` matching `name`.
    ///
    /// `current` must be one of this element's children (identity, not
    /// equality); otherwise `None` is returned.
    pub fn next_child(&self, current: &Element, name: Option<&str>) -> Option<&Element> {
        let pos = self
            .children
            .iter()
            .position(|c| std::ptr::eq(c, current))?;
        self.children[pos + 1..]
            .iter()
            .find(|c| name.map_or(true, |n| c.is_named(n)))
    }

    /// Remove the child at `index` and hand its ownership to the caller.
    pub fn detach_child(&mut self, index: usize) -> Result<Element> {
        if index >= self.children.len() {
            return self.last_error.fail(Error::IndexOutOfRange {
                index,
                len: self.children.len(),
            });
        }
        Ok(self.children.remove(index))
    }

    /// Destroy the child at `index` together with its subtree.
    pub fn remove_child(&mut self, index: usize) -> Result<()> {
        self.detach_child(index).map(drop)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge `source` into this element. Returns whether anything changed.
    ///
    /// With `add_new == false` only attributes and children already present
    /// here are updated; with `true` novel ones are introduced as well.
    pub fn merge(&mut self, source: &Element, add_new: bool) -> bool {
        merge::merge(self, source, add_new, false).changed
    }

    /// Like [`merge`](Self::merge), also building an element holding exactly
    /// the changed or added items. The diff is always returned, even empty.
    pub fn merge_with_diff(&mut self, source: &Element, add_new: bool) -> MergeOutcome {
        merge::merge(self, source, add_new, true)
    }
}

/// Structural equality: names, attribute sets, content bytes and child
/// order. Case of the element name is significant here.
impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes == other.attributes
            && self.content == other.content
            && self.children == other.children
    }
}

impl Eq for Element {}

impl LastError for Element {
    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> Element {
        Element::new(name).unwrap()
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(Element::new(""), Err(Error::InvalidArgument(_))));
        let mut e = leaf("a");
        assert!(e.set_name("").is_err());
        assert_eq!(e.name(), "a");
        assert!(e.last_error().is_some());
    }

    #[test]
    fn test_typed_attributes() {
        let mut e = leaf("Status");
        e.set_attribute_i32("i", -7).unwrap();
        e.set_attribute_u32("u", 4_000_000_000).unwrap();
        e.set_attribute_i64("l", -9_000_000_000).unwrap();
        e.set_attribute_bool("b", true).unwrap();
        e.set_attribute_f64("f", 1.5).unwrap();
        e.set_attribute("s", "text").unwrap();

        assert_eq!(e.attribute_i32("I"), Some(-7));
        assert_eq!(e.attribute_u32("u"), Some(4_000_000_000));
        assert_eq!(e.attribute_i64("l"), Some(-9_000_000_000));
        assert_eq!(e.attribute_bool("b"), Some(true));
        assert_eq!(e.attribute_f64("f"), Some(1.5));
        assert_eq!(e.attribute("s"), Some("text"));
        assert_eq!(e.attribute_i32("s"), None);
        assert_eq!(e.attribute_bool("s"), Some(false));
        assert_eq!(e.attribute_bool("missing"), None);
        assert_eq!(e.attribute_count(), 6);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut e = leaf("a");
        assert!(e.set_attribute("", "v").is_err());
        assert_eq!(e.attribute_count(), 0);
    }

    #[test]
    fn test_content_is_copied() {
        let mut e = leaf("Image");
        let mut bytes = vec![0u8, 1, 2, 0];
        e.set_content(&bytes);
        bytes[0] = 9;
        assert_eq!(e.content(), &[0, 1, 2, 0]);
        assert_eq!(e.content_size(), 4);
    }

    #[test]
    fn test_child_cursor() {
        let mut root = leaf("root");
        root.add_child(leaf("Plate"));
        root.add_child(leaf("Image"));
        root.add_child(leaf("plate"));

        assert_eq!(root.child_count(None), 3);
        assert_eq!(root.child_count(Some("PLATE")), 2);

        let first = root.first_child(Some("plate")).unwrap();
        assert_eq!(first.name(), "Plate");
        let second = root.next_child(first, Some("plate")).unwrap();
        assert_eq!(second.name(), "plate");
        assert!(root.next_child(second, Some("plate")).is_none());

        let any = root.next_child(first, None).unwrap();
        assert_eq!(any.name(), "Image");
    }

    #[test]
    fn test_first_child_outlives_name() {
        let mut root = leaf("root");
        root.add_child(leaf("Plate"));
        let found = {
            let wanted = String::from("PLATE");
            root.first_child(Some(&wanted))
        };
        assert_eq!(found.map(Element::name), Some("Plate"));
    }

    #[test]
    fn test_next_child_foreign_element() {
        let mut root = leaf("root");
        root.add_child(leaf("a"));
        let stranger = leaf("a");
        assert!(root.next_child(&stranger, None).is_none());
    }

    #[test]
    fn test_detach_out_of_range() {
        let mut root = leaf("root");
        let err = root.detach_child(0).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 0, len: 0 }));
    }

    #[test]
    fn test_add_child_returns_handle() {
        let mut root = leaf("root");
        root.add_child(leaf("Plate"))
            .set_attribute("text", "AB123CD")
            .unwrap();
        assert_eq!(root.child(0).unwrap().attribute("text"), Some("AB123CD"));
    }
}
