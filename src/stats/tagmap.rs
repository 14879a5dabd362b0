use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts keyed by an integer such as the `NH` value or an insert size.
/// Keys serialize as strings in numeric order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMap(BTreeMap<u64, u64>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: u64) {
        *self.0.entry(key).or_default() += 1;
    }

    pub fn get(&self, key: u64) -> u64 {
        self.0.get(&key).copied().unwrap_or(0)
    }

    pub fn update(&mut self, other: &TagMap) {
        for (&key, &count) in &other.0 {
            *self.0.entry(key).or_default() += count;
        }
    }

    /// Sum over all keys.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
