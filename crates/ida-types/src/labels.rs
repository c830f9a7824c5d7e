//! Label keys and source-prefix partitioning.
//!
//! Labels arrive as `source:key=value` pairs. The object store forbids `:` in
//! the keys of an object's discoverable labels, so only the labels of one
//! governing source are surfaced there, with the `source:` prefix stripped.
//! The full label map is always persisted separately as the canonical key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical label mapping. `BTreeMap` keeps iteration and serialization
/// order stable, so equal maps serialize identically.
pub type LabelMap = BTreeMap<String, String>;

/// Separator between a label's source and its key.
pub const SOURCE_SEPARATOR: char = ':';

/// Labels derived from the cluster orchestrator.
pub const LABEL_SOURCE_K8S: &str = "k8s";

/// Labels reserved for built-in identities.
pub const LABEL_SOURCE_RESERVED: &str = "reserved";

/// A key that the backend can allocate an identity for.
///
/// The backend never interprets keys beyond their label map: equality is
/// full-map equality, and keys are rebuilt from the persisted canonical map
/// when events arrive from the store.
pub trait AllocatorKey: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The full label mapping for this key.
    fn to_label_map(&self) -> LabelMap;

    /// Rebuild a key from a persisted label mapping.
    fn from_label_map(map: LabelMap) -> Self;
}

/// The default allocation key: a plain label set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelKey(LabelMap);

impl LabelKey {
    pub fn new(labels: LabelMap) -> Self {
        Self(labels)
    }

    /// Build a key from `(key, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Parse `source:key=value` entries separated by commas.
    ///
    /// Entries without `=` get an empty value. Whitespace around entries is
    /// ignored.
    pub fn parse(spec: &str) -> Self {
        Self(
            spec.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry.to_string(), String::new()),
                })
                .collect(),
        )
    }

    pub fn labels(&self) -> &LabelMap {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AllocatorKey for LabelKey {
    fn to_label_map(&self) -> LabelMap {
        self.0.clone()
    }

    fn from_label_map(map: LabelMap) -> Self {
        Self(map)
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.0 {
            write!(f, "{k}={v};")?;
        }
        Ok(())
    }
}

/// Result of splitting a label map by source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionedLabels {
    /// Labels of the governing source, with the `source:` prefix stripped.
    pub selected: LabelMap,
    /// All other labels, untouched.
    pub skipped: LabelMap,
}

/// Split `labels` into the governing `source` labels and everything else.
///
/// Selected keys lose their `source:` prefix, since the store rejects `:` in
/// discoverable label keys. Skipped labels are still part of the identity;
/// they are only absent from the discoverable tag set.
pub fn sanitize_labels(labels: &LabelMap, source: &str) -> PartitionedLabels {
    let prefix = format!("{source}{SOURCE_SEPARATOR}");
    let mut partitioned = PartitionedLabels::default();
    for (k, v) in labels {
        match k.strip_prefix(&prefix) {
            Some(stripped) => {
                partitioned.selected.insert(stripped.to_string(), v.clone());
            }
            None => {
                partitioned.skipped.insert(k.clone(), v.clone());
            }
        }
    }
    partitioned
}

/// Re-apply the `source:` prefix to labels selected by [`sanitize_labels`].
///
/// Only the governing source's labels can be recovered this way; skipped
/// labels live solely in the canonical label field.
pub fn restore_labels(selected: &LabelMap, source: &str) -> LabelMap {
    selected
        .iter()
        .map(|(k, v)| (format!("{source}{SOURCE_SEPARATOR}{k}"), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(pairs: &[(&str, &str)]) -> LabelMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn partition_reserved_namespace() {
        let labels = map(&[("reserved:a", "1"), ("custom:b", "2")]);
        let parts = sanitize_labels(&labels, LABEL_SOURCE_RESERVED);
        assert_eq!(parts.selected, map(&[("a", "1")]));
        assert_eq!(parts.skipped, map(&[("custom:b", "2")]));
    }

    #[test]
    fn restore_recovers_only_governing_subset() {
        let labels = map(&[("reserved:a", "1"), ("custom:b", "2")]);
        let parts = sanitize_labels(&labels, LABEL_SOURCE_RESERVED);
        let restored = restore_labels(&parts.selected, LABEL_SOURCE_RESERVED);
        assert_eq!(restored, map(&[("reserved:a", "1")]));
        assert_ne!(restored, labels);
    }

    #[test]
    fn prefix_must_include_separator() {
        // "k8sfoo" shares the source name but not the "k8s:" prefix.
        let labels = map(&[("k8sfoo", "x"), ("k8s:app", "web")]);
        let parts = sanitize_labels(&labels, LABEL_SOURCE_K8S);
        assert_eq!(parts.selected, map(&[("app", "web")]));
        assert_eq!(parts.skipped, map(&[("k8sfoo", "x")]));
    }

    #[test]
    fn only_first_prefix_is_stripped() {
        let labels = map(&[("k8s:k8s:nested", "v")]);
        let parts = sanitize_labels(&labels, LABEL_SOURCE_K8S);
        assert_eq!(parts.selected, map(&[("k8s:nested", "v")]));
    }

    #[test]
    fn empty_labels_partition_to_empty() {
        let parts = sanitize_labels(&LabelMap::new(), LABEL_SOURCE_K8S);
        assert!(parts.selected.is_empty());
        assert!(parts.skipped.is_empty());
    }

    #[test]
    fn label_key_equality_is_order_insensitive() {
        let a = LabelKey::from_pairs([("k8s:app", "web"), ("k8s:tier", "front")]);
        let b = LabelKey::from_pairs([("k8s:tier", "front"), ("k8s:app", "web")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn label_key_parse() {
        let key = LabelKey::parse("k8s:app=web, reserved:host ,custom:x=1");
        assert_eq!(key.len(), 3);
        assert_eq!(key.labels().get("k8s:app").map(String::as_str), Some("web"));
        assert_eq!(key.labels().get("reserved:host").map(String::as_str), Some(""));
    }

    #[test]
    fn label_key_map_round_trip() {
        let key = LabelKey::from_pairs([("k8s:app", "db")]);
        assert_eq!(LabelKey::from_label_map(key.to_label_map()), key);
    }

    proptest! {
        #[test]
        fn partition_is_lossless(
            entries in proptest::collection::btree_map(
                ("(k8s|reserved|custom|)", ":?", "[a-z]{0,6}")
                    .prop_map(|(src, sep, name)| format!("{src}{sep}{name}")),
                "[a-z0-9]{0,4}",
                0..12,
            )
        ) {
            let parts = sanitize_labels(&entries, LABEL_SOURCE_K8S);
            prop_assert_eq!(parts.selected.len() + parts.skipped.len(), entries.len());

            let mut rebuilt = restore_labels(&parts.selected, LABEL_SOURCE_K8S);
            rebuilt.extend(parts.skipped.clone());
            prop_assert_eq!(rebuilt, entries);

            for key in parts.skipped.keys() {
                prop_assert!(!key.starts_with("k8s:"));
            }
        }
    }
}
