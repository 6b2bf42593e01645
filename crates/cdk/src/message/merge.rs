// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element merge.
//!
//! Children are paired by name and rank: the n-th source child named `X` is
//! merged into the n-th destination child named `X`. Attributes are paired by
//! key. Content is copied when the source carries non-empty content that
//! differs from the destination's.
//!
//! With `add_new == false` nothing absent from the destination is created:
//! no attribute, no child, and no content on an element that had none.

use super::element::Element;

/// Result of [`Element::merge_with_diff`].
#[derive(Debug)]
pub struct MergeOutcome {
    /// Whether the destination was modified.
    pub changed: bool,
    /// Element named like the destination, holding only what changed.
    /// `None` only when no diff was requested.
    pub diff: Option<Element>,
}

pub(crate) fn merge(dest: &mut Element, src: &Element, add_new: bool, want_diff: bool) -> MergeOutcome {
    let mut diff = want_diff.then(|| Element::named(dest.name()));
    let changed = merge_into(dest, src, add_new, diff.as_mut());
    MergeOutcome { changed, diff }
}

fn merge_into(
    dest: &mut Element,
    src: &Element,
    add_new: bool,
    mut diff: Option<&mut Element>,
) -> bool {
    let mut changed = false;

    for (key, value) in src.attributes().iter() {
        if !add_new && !dest.attributes().contains(key) {
            continue;
        }
        if dest.attributes_mut().set(key, value) {
            changed = true;
            if let Some(d) = diff.as_deref_mut() {
                d.attributes_mut().set(key, value);
            }
        }
    }

    let content = src.content();
    if !content.is_empty()
        && content != dest.content()
        && (add_new || !dest.content().is_empty())
    {
        dest.set_content(content);
        changed = true;
        if let Some(d) = diff.as_deref_mut() {
            d.set_content(content);
        }
    }

    for (pos, child) in src.children().iter().enumerate() {
        let rank = src.children()[..pos]
            .iter()
            .filter(|c| c.is_named(child.name()))
            .count();
        let target = dest
            .children()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_named(child.name()))
            .nth(rank)
            .map(|(i, _)| i);

        match target {
            Some(index) => {
                let Some(dest_child) = dest.child_mut(index) else {
                    continue;
                };
                let mut child_diff = diff.is_some().then(|| Element::named(dest_child.name()));
                if merge_into(dest_child, child, add_new, child_diff.as_mut()) {
                    changed = true;
                    if let (Some(d), Some(cd)) = (diff.as_deref_mut(), child_diff) {
                        d.add_child(cd);
                    }
                }
            }
            None if add_new => {
                dest.add_child(child.copy());
                changed = true;
                if let Some(d) = diff.as_deref_mut() {
                    d.add_child(child.copy());
                }
            }
            None => {}
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(name: &str, attrs: &[(&str, &str)]) -> Element {
        let mut e = Element::new(name).unwrap();
        for (k, v) in attrs {
            e.set_attribute(k, *v).unwrap();
        }
        e
    }

    #[test]
    fn test_update_only() {
        let mut dest = el("Config", &[("a", "1"), ("b", "2")]);
        let src = el("Config", &[("a", "9"), ("c", "3")]);

        let out = dest.merge_with_diff(&src, false);
        assert!(out.changed);
        assert_eq!(dest.attribute("a"), Some("9"));
        assert_eq!(dest.attribute("b"), Some("2"));
        assert_eq!(dest.attribute("c"), None);

        let diff = out.diff.unwrap();
        assert_eq!(diff.name(), "Config");
        assert_eq!(diff.attribute_count(), 1);
        assert_eq!(diff.attribute("a"), Some("9"));
    }

    #[test]
    fn test_add_new() {
        let mut dest = el("Config", &[("a", "1")]);
        let mut src = el("Config", &[("a", "1"), ("c", "3")]);
        src.add_child(el("Lane", &[("id", "1")]));

        let out = dest.merge_with_diff(&src, true);
        assert!(out.changed);
        assert_eq!(dest.attribute("c"), Some("3"));
        assert_eq!(dest.child_count(Some("lane")), 1);

        let diff = out.diff.unwrap();
        assert_eq!(diff.attribute_count(), 1);
        assert_eq!(diff.attribute("c"), Some("3"));
        assert_eq!(diff.child_count(None), 1);
    }

    #[test]
    fn test_no_change_yields_empty_diff() {
        let mut dest = el("Config", &[("a", "1")]);
        let src = el("Config", &[("A", "1")]);

        let out = dest.merge_with_diff(&src, true);
        assert!(!out.changed);
        let diff = out.diff.unwrap();
        assert_eq!(diff.attribute_count(), 0);
        assert_eq!(diff.child_count(None), 0);
    }

    #[test]
    fn test_nested_children_paired_by_rank() {
        let mut dest = el("root", &[]);
        dest.add_child(el("Lane", &[("speed", "10")]));
        dest.add_child(el("Lane", &[("speed", "20")]));

        let mut src = el("root", &[]);
        src.add_child(el("Lane", &[("speed", "10")]));
        src.add_child(el("lane", &[("speed", "25")]));
        src.add_child(el("Lane", &[("speed", "30")]));

        let out = dest.merge_with_diff(&src, false);
        assert!(out.changed);
        assert_eq!(dest.child_count(None), 2);
        assert_eq!(dest.child(1).unwrap().attribute("speed"), Some("25"));

        let diff = out.diff.unwrap();
        assert_eq!(diff.child_count(None), 1);
        assert_eq!(diff.child(0).unwrap().attribute("speed"), Some("25"));
    }

    #[test]
    fn test_content_rules() {
        let mut dest = el("Image", &[]);
        let mut src = el("Image", &[]);
        src.set_content(b"jpeg");

        assert!(!dest.merge(&src, false));
        assert!(dest.content().is_empty());

        assert!(dest.merge(&src, true));
        assert_eq!(dest.content(), b"jpeg");

        src.set_content(b"png");
        assert!(dest.merge(&src, false));
        assert_eq!(dest.content(), b"png");
    }
}
