//! Attribute registry: named, typed fields that dissectors contribute to a
//! packet or call so that filters and display layers can look values up by
//! name instead of by concrete struct field.

use std::borrow::Cow;
use std::collections::BTreeMap;

/// A single registered attribute definition.
///
/// `title` and `description` are display metadata only; they never affect
/// equality, hashing, or filter evaluation, which always go through `id`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeDef {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Suggested column width for tabular display, in characters.
    pub width: u16,
}

impl AttributeDef {
    pub const fn new(id: &'static str, title: &'static str, description: &'static str, width: u16) -> Self {
        Self {
            id,
            title,
            description,
            width,
        }
    }
}

/// Ordered bag of attribute values keyed by attribute id.
///
/// Values are stored as owned strings; numeric/enum attributes are rendered
/// to their canonical string form by the dissector that sets them so that
/// filter predicates (string-equals, substring, numeric range) operate
/// uniformly regardless of the attribute's underlying Rust type.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttributeSet {
    values: BTreeMap<&'static str, String>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: &'static str, value: impl Into<String>) {
        self.values.insert(id, value.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Renders a value for display, falling back to an empty string if the
    /// attribute was never set on this entity.
    pub fn display(&self, id: &str) -> Cow<'_, str> {
        match self.get(id) {
            Some(v) => Cow::Borrowed(v),
            None => Cow::Borrowed(""),
        }
    }
}

/// The well-known attribute registry shared across the codec crates. Each
/// codec crate registers its own attributes here via the constants it
/// exports (`sipwatch_codec_sip::attributes::*`, etc); this module only
/// defines the shape, not the concrete set.
pub mod well_known {
    use super::AttributeDef;

    pub const SRC_ADDR: AttributeDef = AttributeDef::new("src_addr", "Source", "Source address:port", 21);
    pub const DST_ADDR: AttributeDef = AttributeDef::new("dst_addr", "Destination", "Destination address:port", 21);
    pub const TIMESTAMP: AttributeDef = AttributeDef::new("ts", "Time", "Capture timestamp", 12);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_attribute_displays_empty() {
        let attrs = AttributeSet::new();
        assert_eq!(attrs.display("method"), "");
        assert!(!attrs.contains("method"));
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut attrs = AttributeSet::new();
        attrs.set("method", "INVITE");
        assert_eq!(attrs.get("method"), Some("INVITE"));
        assert_eq!(attrs.display("method"), "INVITE");
    }
}
