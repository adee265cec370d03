use std::collections::HashMap;

use crate::models::ScoreItem;

/// Counting map of grade occurrences. Every stored count is positive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreMultiset {
    counts: HashMap<ScoreItem, u32>,
}

impl ScoreMultiset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: ScoreItem) {
        self.insert_many(item, 1);
    }

    pub fn insert_many(&mut self, item: ScoreItem, times: u32) {
        if times == 0 {
            return;
        }
        *self.counts.entry(item).or_insert(0) += times;
    }

    pub fn count(&self, item: &ScoreItem) -> u32 {
        self.counts.get(item).copied().unwrap_or(0)
    }

    /// Total number of occurrences, multiplicities included.
    pub fn len(&self) -> usize {
        self.counts.values().map(|count| *count as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn distinct(&self) -> impl Iterator<Item = &ScoreItem> {
        self.counts.keys()
    }
}

impl FromIterator<ScoreItem> for ScoreMultiset {
    fn from_iter<I: IntoIterator<Item = ScoreItem>>(iter: I) -> Self {
        let mut multiset = Self::new();
        for item in iter {
            multiset.insert(item);
        }
        multiset
    }
}

/// Grade state of one child at one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    counts: ScoreMultiset,
    period_label: Option<String>,
}

impl Snapshot {
    pub fn new(counts: ScoreMultiset, period_label: Option<String>) -> Self {
        Self {
            counts,
            period_label,
        }
    }

    pub fn counts(&self) -> &ScoreMultiset {
        &self.counts
    }

    pub fn period_label(&self) -> Option<&str> {
        self.period_label.as_deref()
    }
}
