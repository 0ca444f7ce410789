//! Vector clocks: per-service causal counters with a JSON string encoding.
//!
//! The canonical encoding is a JSON object mapping service name to counter,
//! with keys in sorted order. The zero clock encodes as `{}`. Zero counters
//! are never stored, so structural equality is causal equality.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FaultError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl VectorClock {
    /// The zero clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `node`, zero when absent.
    pub fn get(&self, node: &str) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Advances the counter for `node` and returns its new value.
    pub fn increment(&mut self, node: &str) -> u64 {
        let counter = self.entries.entry(node.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Coordinate-wise maximum, in place.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &value) in &other.entries {
            let counter = self.entries.entry(node.clone()).or_insert(0);
            *counter = (*counter).max(value);
        }
    }

    /// Coordinate-wise maximum of `self` and `other`.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// `true` when every counter of `self` is <= the matching counter of
    /// `other` and the clocks differ.
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.partial_cmp(other) == Some(Ordering::Less)
    }

    /// Neither clock causally precedes the other.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.partial_cmp(other).is_none()
    }

    pub fn encode(&self) -> String {
        // A map of strings to integers always serializes.
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }

    /// Strict decoding. Empty input is the zero clock; anything that is not a
    /// JSON object of non-negative integers is an error.
    pub fn decode(encoded: &str) -> Result<Self, FaultError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Ok(Self::new());
        }
        let entries: BTreeMap<String, u64> = serde_json::from_str(trimmed)
            .map_err(|e| FaultError::Decode(format!("vector clock `{}`: {}", trimmed, e)))?;
        Ok(entries.into_iter().collect())
    }

    /// Lenient decoding used on read paths: absent or malformed input yields
    /// the zero clock.
    pub fn decode_or_default(encoded: Option<&str>) -> Self {
        match encoded {
            None => Self::new(),
            Some(raw) => Self::decode(raw).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding malformed vector clock");
                Self::new()
            }),
        }
    }
}

impl FromIterator<(String, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let entries = iter.into_iter().filter(|(_, v)| *v > 0).collect();
        Self { entries }
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let mut less = false;
        let mut greater = false;
        for node in self.entries.keys().chain(other.entries.keys()) {
            match self.get(node).cmp(&other.get(node)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for VectorClock {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
