//! # Topic Algebra
//!
//! A topic is a dotted string such as `"product.out"`. Segment order carries no
//! meaning: the string is parsed into a sorted set of keys, and two topics with
//! the same keys are the same topic.
//!
//! The set renders two ways:
//!
//! | Form | Empty | `{b, a}` |
//! |------|-------|----------|
//! | `PubTopic` (routing key) | `""` | `"a.b"` |
//! | `SubTopic` (binding key) | `"#"` | `"#.a.#.b.#"` |
//!
//! The wildcards around every key let a subscriber bound on a subset of keys
//! match publishers that carry additional keys in any position.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Multi-word wildcard understood by topic exchanges.
pub const WILDCARD: &str = "#";

/// A single dot-segment of a topic string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// An unordered set of keys parsed from a dotted string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Topic {
    keys: BTreeSet<Key>,
}

impl Topic {
    /// Parse a dotted string. `None`, `""` and empty segments contribute no keys.
    pub fn parse<'a>(topic: impl Into<Option<&'a str>>) -> Self {
        let keys = topic
            .into()
            .unwrap_or_default()
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(Key::from)
            .collect();
        Self { keys }
    }

    pub fn keys(&self) -> &BTreeSet<Key> {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k.as_str() == key)
    }

    /// Keys present in both topics.
    pub fn overlap(&self, other: &Topic) -> BTreeSet<Key> {
        self.keys.intersection(&other.keys).cloned().collect()
    }

    pub fn overlaps(&self, other: &Topic) -> bool {
        !self.keys.is_disjoint(&other.keys)
    }

    /// Keys present in either topic.
    #[must_use]
    pub fn union(&self, other: &Topic) -> Topic {
        Topic {
            keys: self.keys.union(&other.keys).cloned().collect(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.keys.extend(
            key.split('.')
                .filter(|segment| !segment.is_empty())
                .map(Key::from),
        );
        self
    }

    fn join(&self, separator: &str) -> String {
        self.keys
            .iter()
            .map(Key::as_str)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join("."))
    }
}

impl FromStr for Topic {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl FromIterator<Key> for Topic {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// A topic rendered as a concrete routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PubTopic(Topic);

impl PubTopic {
    pub fn parse<'a>(topic: impl Into<Option<&'a str>>) -> Self {
        Self(Topic::parse(topic))
    }

    /// Sorted keys joined by `.`; `""` when empty.
    pub fn render(&self) -> String {
        self.0.join(".")
    }

    pub fn into_topic(self) -> Topic {
        self.0
    }
}

impl Deref for PubTopic {
    type Target = Topic;

    fn deref(&self) -> &Topic {
        &self.0
    }
}

impl From<Topic> for PubTopic {
    fn from(topic: Topic) -> Self {
        Self(topic)
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A topic rendered as a wildcard binding key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubTopic(Topic);

impl SubTopic {
    pub fn parse<'a>(topic: impl Into<Option<&'a str>>) -> Self {
        Self(Topic::parse(topic))
    }

    /// `#` before, between and after every sorted key; `"#"` when empty.
    pub fn render(&self) -> String {
        if self.0.is_empty() {
            return WILDCARD.to_string();
        }
        format!("{WILDCARD}.{}.{WILDCARD}", self.0.join(".#."))
    }

    pub fn into_topic(self) -> Topic {
        self.0
    }
}

impl Deref for SubTopic {
    type Target = Topic;

    fn deref(&self) -> &Topic {
        &self.0
    }
}

impl From<Topic> for SubTopic {
    fn from(topic: Topic) -> Self {
        Self(topic)
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_element() {
        assert_eq!(SubTopic::parse("").render(), "#");
        assert_eq!(PubTopic::parse(None).render(), "");
        assert!(Topic::parse(None).is_empty());
    }

    #[test]
    fn test_keys_are_sorted() {
        assert_eq!(PubTopic::parse("product.out").render(), "out.product");
        assert_eq!(SubTopic::parse("product.in").render(), "#.in.#.product.#");
        assert_eq!(SubTopic::parse("in").render(), "#.in.#");
    }

    #[test]
    fn test_empty_segments_ignored() {
        assert_eq!(PubTopic::parse(".a..b.").render(), "a.b");
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        assert_eq!(PubTopic::parse("a.b.a").render(), "a.b");
    }

    #[test]
    fn test_overlap() {
        let overlap = Topic::parse("a.b").overlap(&Topic::parse("b.c"));
        assert_eq!(overlap, BTreeSet::from([Key::from("b")]));
        assert!(Topic::parse("a").overlap(&Topic::parse("c")).is_empty());
        assert!(!Topic::parse(None).overlaps(&Topic::parse("a")));
    }

    #[test]
    fn test_union_and_with_key() {
        let topic = Topic::parse("out").union(&Topic::parse("abc"));
        assert_eq!(PubTopic::from(topic.clone()).render(), "abc.out");
        assert_eq!(topic.with_key("x.y").to_string(), "abc.out.x.y");
    }

    #[test]
    fn test_rendered_form_round_trips() {
        let topic = Topic::parse("z.y.x");
        let again: Topic = topic.to_string().parse().unwrap();
        assert_eq!(again, topic);
        assert_eq!(PubTopic::from(again).render(), "x.y.z");
    }

    fn dotted_permutation() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
        prop::collection::vec("[a-z0-9_]{1,6}", 0..6).prop_flat_map(|keys| {
            let shuffled = Just(keys.clone()).prop_shuffle();
            (Just(keys), shuffled)
        })
    }

    proptest! {
        #[test]
        fn prop_render_ignores_key_order((keys, shuffled) in dotted_permutation()) {
            let a = keys.join(".");
            let b = shuffled.join(".");
            prop_assert_eq!(PubTopic::parse(a.as_str()).render(), PubTopic::parse(b.as_str()).render());
            prop_assert_eq!(SubTopic::parse(a.as_str()).render(), SubTopic::parse(b.as_str()).render());
        }

        #[test]
        fn prop_parse_render_is_idempotent(keys in prop::collection::vec("[a-z]{1,5}", 0..5)) {
            let rendered = PubTopic::parse(keys.join(".").as_str()).render();
            prop_assert_eq!(PubTopic::parse(rendered.as_str()).render(), rendered.clone());
        }
    }
}
