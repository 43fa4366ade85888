//! Case-insensitive attribute storage with the `chanid`/`channelid` alias.
//!
//! Mirrors the wire protocol's own sloppiness: servers use `chanid` in some
//! frames and `channelid` in others for the same channel reference. Only one
//! canonical key is ever stored; the alias is resolved at the API boundary so
//! callers never have to think about which spelling is "the real one".

use std::collections::HashMap;

fn canonical_key(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower == "chanid" {
        "channelid".to_string()
    } else {
        lower
    }
}

/// A case-insensitive `String -> String` map used for user, channel, and
/// file records, and for merged `welcome`/`serverupdate` server info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrDict {
    entries: HashMap<String, String>,
}

impl AttrDict {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by name. Missing keys return `None` rather than
    /// erroring; this matches the wire format, where absent parameters
    /// just mean "not present this time", not a programming error.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&canonical_key(name)).map(String::as_str)
    }

    /// Set a value, applying the `chanid`/`channelid` alias.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(canonical_key(name), value.into());
    }

    /// Remove a value, returning the old one if present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&canonical_key(name))
    }

    /// Whether a key is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&canonical_key(name))
    }

    /// Iterate over canonical key/value pairs. Iteration order is
    /// unspecified (backed by a hash map); callers needing a stable order
    /// for diffing should sort the keys themselves.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The set of canonical keys currently present.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Merge another map's entries over this one, in place (later values
    /// win). This is the primitive `updateParms` (§C5) builds on.
    pub fn merge(&mut self, other: &AttrDict) {
        for (k, v) in other.iter() {
            self.entries.insert(k.to_string(), v.to_string());
        }
    }

    /// Remove every key not present in `keep` or in `incoming`. Used by
    /// `updateParms`'s `preserve` step.
    pub fn retain_only(&mut self, keep: &[&str], incoming: &AttrDict) {
        let keep_lower: Vec<String> = keep.iter().map(|k| canonical_key(k)).collect();
        self.entries.retain(|k, _| {
            keep_lower.iter().any(|kk| kk == k) || incoming.contains(k)
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromIterator<(String, String)> for AttrDict {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut dict = AttrDict::new();
        for (k, v) in iter {
            dict.set(&k, v);
        }
        dict
    }
}
