use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::diary::DiarySession;
use crate::diff::{diff, Diff};
use crate::error::{FetchError, FetchErrorKind};
use crate::models::{Entity, EntityId};
use crate::providers::{DispatchSink, Fetcher, OperatorSink, ReauthTrigger, SessionProvider};
use crate::report::{format_changes, format_rollover};
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

pub struct Collaborators {
    pub sessions: Arc<dyn SessionProvider>,
    pub fetcher: Arc<dyn Fetcher>,
    pub dispatch: Arc<dyn DispatchSink>,
    pub reauth: Arc<dyn ReauthTrigger>,
    pub operator: Arc<dyn OperatorSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    NoSession,
    /// First observation stored silently.
    Baselined,
    Unchanged,
    Notified { lines: usize },
    PeriodRolledOver { period: String },
    Failed(FetchErrorKind),
}

pub struct NotificationEngine {
    store: SnapshotStore,
    collaborators: Collaborators,
    fetch_timeout: Duration,
    today: fn() -> NaiveDate,
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

impl NotificationEngine {
    pub fn new(store: SnapshotStore, collaborators: Collaborators, fetch_timeout: Duration) -> Self {
        Self {
            store,
            collaborators,
            fetch_timeout,
            today: local_today,
        }
    }

    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Captures a silent baseline for a newly subscribed child. Idempotent.
    ///
    /// Returns whether a baseline exists afterwards. A failed first fetch leaves
    /// the child without one; the next scheduled check captures it instead.
    pub async fn enroll(&self, entity: &Entity) -> bool {
        if self.store.is_baselined(&entity.id) {
            return true;
        }
        let outcome = self.check(entity).await;
        debug!(entity = %entity.id, ?outcome, "enrollment fetch finished");
        self.store.is_baselined(&entity.id)
    }

    pub fn unenroll(&self, id: &EntityId) {
        if self.store.evict(id) {
            info!(entity = %id, "baseline dropped");
        }
    }

    pub async fn check(&self, entity: &Entity) -> CheckOutcome {
        let owner_id = entity.id.owner_id;
        let Some(session) = self.collaborators.sessions.get_session(owner_id).await else {
            debug!(entity = %entity.id, "no live diary session, skipping");
            return CheckOutcome::NoSession;
        };

        let fresh = match self.fetch(&session, entity).await {
            Ok(snapshot) => snapshot,
            Err(err) => return self.handle_fetch_error(entity, err).await,
        };

        let Some(baseline) = self.store.baseline(&entity.id) else {
            info!(
                entity = %entity.id,
                grades = fresh.counts().len(),
                "baseline captured"
            );
            self.store.replace(entity.id, fresh);
            return CheckOutcome::Baselined;
        };

        match diff(&baseline, &fresh) {
            Diff::PeriodChanged { from, to } => {
                info!(entity = %entity.id, %from, %to, "grading period changed");
                self.store.replace(entity.id, fresh);
                self.deliver(entity, &format_rollover(&to)).await;
                CheckOutcome::PeriodRolledOver { period: to }
            }
            Diff::Changes(changes) => {
                self.store.replace(entity.id, fresh);
                match format_changes(&changes, entity.display_name.as_deref()) {
                    Some(text) => {
                        let lines = changes.line_count();
                        info!(entity = %entity.id, lines, "grade changes detected");
                        self.deliver(entity, &text).await;
                        CheckOutcome::Notified { lines }
                    }
                    None => CheckOutcome::Unchanged,
                }
            }
        }
    }

    async fn fetch(&self, session: &DiarySession, entity: &Entity) -> Result<Snapshot, FetchError> {
        let request = self
            .collaborators
            .fetcher
            .fetch(session, entity.id.child_index, (self.today)());
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "fetch timed out after {}s",
                self.fetch_timeout.as_secs_f32()
            ))),
        }
    }

    async fn handle_fetch_error(&self, entity: &Entity, err: FetchError) -> CheckOutcome {
        let kind = err.kind();
        match kind {
            FetchErrorKind::Unauthorized => {
                warn!(entity = %entity.id, "diary session rejected, requesting re-auth");
                self.collaborators.reauth.request_reauth(entity.id.owner_id);
            }
            FetchErrorKind::Transient => {
                warn!(entity = %entity.id, %err, "fetch failed, retrying next cycle");
            }
            FetchErrorKind::Malformed => {
                error!(entity = %entity.id, %err, "diary returned malformed grades");
                self.collaborators
                    .operator
                    .notify_operator(&format!(
                        "Malformed diary response for child {}: {err}",
                        entity.id
                    ))
                    .await;
            }
        }
        CheckOutcome::Failed(kind)
    }

    async fn deliver(&self, entity: &Entity, text: &str) {
        // The baseline has already advanced; a failed send is not retried.
        if let Err(err) = self.collaborators.dispatch.send(entity.recipient_id, text).await {
            warn!(
                entity = %entity.id,
                recipient = entity.recipient_id,
                %err,
                "notification was not delivered"
            );
        }
    }
}
