//! Series, labels and matchers
//!
//! The coordinator never decodes chunk payloads: chunks travel through the
//! merge as opaque bytes and sample-level deduplication happens in
//! downstream layers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hashing::fnv64a;

/// One label pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A sorted label set identifying one series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Build a label set from pairs, sorting by name then value.
    pub fn from_pairs<N: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (N, V)>,
    ) -> Self {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(n, v)| Label::new(n, v))
            .collect();
        labels.sort();
        Self(labels)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable 64-bit fingerprint of the label set, used by the query
    /// limiter to count distinct series across replicas without comparing
    /// full label sets.
    pub fn fingerprint(&self) -> u64 {
        // 0xff cannot appear in UTF-8, so it makes an unambiguous
        // name/value separator.
        const SEP: &[u8] = &[0xff];
        let parts = self
            .0
            .iter()
            .flat_map(|l| [l.name.as_bytes(), SEP, l.value.as_bytes(), SEP]);
        fnv64a(parts)
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", l.name, l.value)?;
        }
        write!(f, "}}")
    }
}

/// Matcher operation on one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regexp,
    NotRegexp,
}

/// One label matcher of a selection query. Matchers are forwarded to
/// store-gateways verbatim; the engine itself only inspects the reserved
/// query-shard matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub op: MatchOp,
    pub name: String,
    pub value: String,
}

impl LabelMatcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: MatchOp::Equal,
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regexp => "=~",
            MatchOp::NotRegexp => "!~",
        };
        write!(f, "{}{}\"{}\"", self.name, op, self.value)
    }
}

/// An encoded chunk of samples. The payload is opaque to the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// First sample timestamp, milliseconds
    pub min_t: i64,
    /// Last sample timestamp, milliseconds
    pub max_t: i64,
    /// Encoded chunk payload
    pub data: Bytes,
}

impl Chunk {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// One series with its chunks, as streamed back by a store-gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub labels: Labels,
    pub chunks: Vec<Chunk>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_sort_on_construction() {
        let labels = Labels::from_pairs([("b", "2"), ("a", "1")]);
        let names: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(labels.get("a"), Some("1"));
        assert_eq!(labels.get("missing"), None);
    }

    #[test]
    fn fingerprint_is_order_independent_and_unambiguous() {
        let a = Labels::from_pairs([("job", "api"), ("instance", "i-1")]);
        let b = Labels::from_pairs([("instance", "i-1"), ("job", "api")]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        // The separator prevents name/value boundary ambiguity.
        let c = Labels::from_pairs([("ab", "c")]);
        let d = Labels::from_pairs([("a", "bc")]);
        assert_ne!(c.fingerprint(), d.fingerprint());
    }

    #[test]
    fn labels_compare_lexicographically() {
        let a = Labels::from_pairs([("job", "api")]);
        let b = Labels::from_pairs([("job", "web")]);
        assert!(a < b);
    }
}
