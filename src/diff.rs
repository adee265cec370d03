use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::ScoreItem;
use crate::snapshot::{ScoreMultiset, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Appeared,
    Disappeared,
}

/// One unit of multiplicity that appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLine {
    pub kind: ChangeKind,
    pub value: String,
    pub label: String,
}

/// Changes grouped by date (ascending), then subject (lexicographic).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    groups: BTreeMap<NaiveDate, BTreeMap<String, Vec<ChangeLine>>>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = (&NaiveDate, &BTreeMap<String, Vec<ChangeLine>>)> {
        self.groups.iter()
    }

    pub fn line_count(&self) -> usize {
        self.groups
            .values()
            .flat_map(|subjects| subjects.values())
            .map(Vec::len)
            .sum()
    }

    /// Number of `kind` lines reported for `item`.
    pub fn count(&self, kind: ChangeKind, item: &ScoreItem) -> usize {
        self.groups
            .get(&item.date)
            .and_then(|subjects| subjects.get(&item.subject))
            .map(|lines| {
                lines
                    .iter()
                    .filter(|line| {
                        line.kind == kind && line.value == item.value && line.label == item.label
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    fn push(&mut self, item: &ScoreItem, kind: ChangeKind, times: u32) {
        let lines = self
            .groups
            .entry(item.date)
            .or_default()
            .entry(item.subject.clone())
            .or_default();
        for _ in 0..times {
            lines.push(ChangeLine {
                kind,
                value: item.value.clone(),
                label: item.label.clone(),
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff {
    /// The grading period label changed; line items are not reported this cycle.
    PeriodChanged { from: String, to: String },
    Changes(ChangeSet),
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        matches!(self, Diff::Changes(changes) if changes.is_empty())
    }
}

pub fn diff(old: &Snapshot, new: &Snapshot) -> Diff {
    if let (Some(from), Some(to)) = (old.period_label(), new.period_label()) {
        if from != to {
            return Diff::PeriodChanged {
                from: from.to_string(),
                to: to.to_string(),
            };
        }
    }

    Diff::Changes(diff_counts(old.counts(), new.counts()))
}

pub fn diff_counts(old: &ScoreMultiset, new: &ScoreMultiset) -> ChangeSet {
    // Sorted key order keeps lines within a subject stable between runs.
    let keys: BTreeSet<&ScoreItem> = old.distinct().chain(new.distinct()).collect();
    let mut changes = ChangeSet::default();

    for item in keys {
        let old_count = old.count(item);
        let new_count = new.count(item);
        match new_count.cmp(&old_count) {
            Ordering::Greater => changes.push(item, ChangeKind::Appeared, new_count - old_count),
            Ordering::Less => changes.push(item, ChangeKind::Disappeared, old_count - new_count),
            Ordering::Equal => {}
        }
    }

    changes
}
