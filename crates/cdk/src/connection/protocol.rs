// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol family detection.
//!
//! Right after the link comes up the equipment may greet with a `Hello`
//! element naming its protocol family:
//!
//! ```text
//! <Hello protocol="CLP"/>
//! ```
//!
//! A first message that is not a greeting is an ordinary message; the family
//! then defaults to NPP, as it does when the equipment stays silent.

use crate::message::{string_equal, Message};
use std::fmt;

/// Root element name of the greeting.
pub const GREETING_ELEMENT: &str = "Hello";

/// Greeting attribute carrying the protocol label.
pub const PROTOCOL_ATTRIBUTE: &str = "protocol";

/// Protocol family spoken by the equipment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Npp,
    Clp,
}

impl Protocol {
    pub fn label(self) -> &'static str {
        match self {
            Protocol::Npp => "NPP",
            Protocol::Clp => "CLP",
        }
    }

    /// Case-insensitive lookup of a label.
    pub fn from_label(label: &str) -> Option<Self> {
        [Protocol::Npp, Protocol::Clp]
            .into_iter()
            .find(|p| string_equal(p.label(), label))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Protocol announced by `msg` when it is a greeting, `None` otherwise.
///
/// A greeting with a missing or unknown label announces the default family.
pub(crate) fn classify(msg: &Message) -> Option<Protocol> {
    let root = msg.root()?;
    if !root.is_named(GREETING_ELEMENT) {
        return None;
    }
    let announced = root.attribute(PROTOCOL_ATTRIBUTE).and_then(Protocol::from_label);
    if announced.is_none() {
        log::debug!(
            "[protocol] greeting without a known protocol ({:?}), assuming {}",
            root.attribute(PROTOCOL_ATTRIBUTE),
            Protocol::default()
        );
    }
    Some(announced.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Element;

    fn hello(protocol: Option<&str>) -> Message {
        let mut root = Element::new(GREETING_ELEMENT).unwrap();
        if let Some(p) = protocol {
            root.set_attribute(PROTOCOL_ATTRIBUTE, p).unwrap();
        }
        Message::with_root(root)
    }

    #[test]
    fn test_labels() {
        assert_eq!(Protocol::Clp.label(), "CLP");
        assert_eq!(Protocol::from_label("npp"), Some(Protocol::Npp));
        assert_eq!(Protocol::from_label("XYZ"), None);
    }

    #[test]
    fn test_classify_greetings() {
        assert_eq!(classify(&hello(Some("CLP"))), Some(Protocol::Clp));
        assert_eq!(classify(&hello(Some("clp"))), Some(Protocol::Clp));
        assert_eq!(classify(&hello(Some("???"))), Some(Protocol::Npp));
        assert_eq!(classify(&hello(None)), Some(Protocol::Npp));
    }

    #[test]
    fn test_non_greeting() {
        let status = Message::with_root(Element::new("Status").unwrap());
        assert_eq!(classify(&status), None);
        assert_eq!(classify(&Message::new()), None);
    }
}
