//! Interfaces the notification core needs from the rest of the bot.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::diary::DiarySession;
use crate::error::{DispatchError, FetchError, MembershipError};
use crate::models::{Entity, Tier};
use crate::snapshot::Snapshot;

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Live diary session for an owner, or `None` while they need to log in again.
    async fn get_session(&self, owner_id: i64) -> Option<DiarySession>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        session: &DiarySession,
        child_index: i32,
        today: NaiveDate,
    ) -> Result<Snapshot, FetchError>;
}

#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn members(&self, tier: &Tier) -> Result<Vec<Entity>, MembershipError>;
}

#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn send(&self, recipient_id: i64, text: &str) -> Result<(), DispatchError>;
}

/// Fire-and-forget: implementations must not block the caller.
pub trait ReauthTrigger: Send + Sync {
    fn request_reauth(&self, owner_id: i64);
}

#[async_trait]
pub trait OperatorSink: Send + Sync {
    async fn notify_operator(&self, text: &str);
}
