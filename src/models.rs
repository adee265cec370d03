use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;

/// Date format used by the diary service and in rendered notifications.
pub const DIARY_DATE_FORMAT: &str = "%d.%m.%Y";

/// One recorded grade occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScoreItem {
    pub subject: String,
    pub date: NaiveDate,
    pub label: String,
    pub value: String,
}

impl ScoreItem {
    pub fn new(
        subject: impl Into<String>,
        date: NaiveDate,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            date,
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub owner_id: i64,
    pub child_index: i32,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.child_index)
    }
}

/// A tracked child as handed out by the tier membership provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    /// Peer that receives notifications (the owner or a chat they linked).
    pub recipient_id: i64,
    /// Set only when the owner tracks more than one child.
    pub display_name: Option<String>,
    pub tier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub cadence: Duration,
}

impl Tier {
    pub fn new(name: impl Into<String>, cadence: Duration) -> Self {
        Self {
            name: name.into(),
            cadence,
        }
    }
}
