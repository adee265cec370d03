//! In-memory collaborators for engine and scheduler tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::diary::{parse_diary_date, DiarySession};
use crate::engine::{Collaborators, NotificationEngine};
use crate::error::{DispatchError, FetchError, MembershipError};
use crate::models::{Entity, EntityId, ScoreItem, Tier};
use crate::providers::{
    DispatchSink, Fetcher, MembershipProvider, OperatorSink, ReauthTrigger, SessionProvider,
};
use crate::snapshot::{ScoreMultiset, Snapshot};
use crate::store::SnapshotStore;

const PUPILS_PER_OWNER: i64 = 100;

pub fn entity(owner_id: i64, child_index: i32) -> Entity {
    Entity {
        id: EntityId {
            owner_id,
            child_index,
        },
        recipient_id: owner_id * 10,
        display_name: None,
        tier: "default".to_string(),
    }
}

pub fn math(date: &str, value: &str) -> ScoreItem {
    ScoreItem::new("Math", parse_diary_date(date).unwrap(), "HW1", value)
}

pub fn snapshot(items: &[(ScoreItem, u32)], period: &str) -> Snapshot {
    let mut counts = ScoreMultiset::new();
    for (item, times) in items {
        counts.insert_many(item.clone(), *times);
    }
    Snapshot::new(counts, Some(period.to_string()))
}

#[derive(Default)]
pub struct FakeSessions {
    revoked: Mutex<HashSet<i64>>,
}

impl FakeSessions {
    pub fn revoke(&self, owner_id: i64) {
        self.revoked.lock().unwrap().insert(owner_id);
    }
}

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn get_session(&self, owner_id: i64) -> Option<DiarySession> {
        if self.revoked.lock().unwrap().contains(&owner_id) {
            return None;
        }
        // Pupil ids encode the owner so the fetcher can recover the entity.
        let pupils: BTreeMap<i32, i64> = (0..10)
            .map(|index| (index, owner_id * PUPILS_PER_OWNER + i64::from(index)))
            .collect();
        Some(DiarySession::new(format!("cookie-{owner_id}"), pupils))
    }
}

#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<EntityId, VecDeque<Result<Snapshot, FetchError>>>>,
    calls: Mutex<HashMap<EntityId, usize>>,
    delay: Mutex<Option<Duration>>,
    delays: Mutex<HashMap<EntityId, Duration>>,
    panicking: Mutex<HashSet<EntityId>>,
}

impl ScriptedFetcher {
    pub fn push(&self, id: EntityId, response: Result<Snapshot, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self, id: EntityId) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_delay_for(&self, id: EntityId, delay: Duration) {
        self.delays.lock().unwrap().insert(id, delay);
    }

    pub fn panic_for(&self, id: EntityId) {
        self.panicking.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        session: &DiarySession,
        child_index: i32,
        _today: NaiveDate,
    ) -> Result<Snapshot, FetchError> {
        let pupil_id = session.pupil_id(child_index).unwrap();
        let id = EntityId {
            owner_id: pupil_id / PUPILS_PER_OWNER,
            child_index,
        };
        *self.calls.lock().unwrap().entry(id).or_insert(0) += 1;

        let crashes = self.panicking.lock().unwrap().contains(&id);
        if crashes {
            panic!("diary client crashed for {id}");
        }

        let own_delay = self.delays.lock().unwrap().get(&id).copied();
        let delay = own_delay.or(*self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(FetchError::Transient("no scripted response".into())))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(i64, String)>>,
    operator: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn operator_messages(&self) -> Vec<String> {
        self.operator.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DispatchSink for RecordingSink {
    async fn send(&self, recipient_id: i64, text: &str) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError("transport unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient_id, text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl OperatorSink for RecordingSink {
    async fn notify_operator(&self, text: &str) {
        self.operator.lock().unwrap().push(text.to_string());
    }
}

#[derive(Default)]
pub struct RecordingReauth {
    owners: Mutex<Vec<i64>>,
}

impl RecordingReauth {
    pub fn requested(&self) -> Vec<i64> {
        self.owners.lock().unwrap().clone()
    }
}

impl ReauthTrigger for RecordingReauth {
    fn request_reauth(&self, owner_id: i64) {
        self.owners.lock().unwrap().push(owner_id);
    }
}

#[derive(Default)]
pub struct StaticMembers {
    entities: Mutex<Vec<Entity>>,
    failing: AtomicBool,
}

impl StaticMembers {
    pub fn set(&self, entities: Vec<Entity>) {
        *self.entities.lock().unwrap() = entities;
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipProvider for StaticMembers {
    async fn members(&self, tier: &Tier) -> Result<Vec<Entity>, MembershipError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MembershipError("database unavailable".into()));
        }
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|entity| entity.tier == tier.name)
            .cloned()
            .collect())
    }
}

fn first_of_september() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()
}

pub struct Harness {
    pub engine: Arc<NotificationEngine>,
    pub sessions: Arc<FakeSessions>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub sink: Arc<RecordingSink>,
    pub reauth: Arc<RecordingReauth>,
    pub members: Arc<StaticMembers>,
}

impl Harness {
    pub fn new() -> Self {
        let sessions = Arc::new(FakeSessions::default());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let sink = Arc::new(RecordingSink::default());
        let reauth = Arc::new(RecordingReauth::default());
        let collaborators = Collaborators {
            sessions: sessions.clone(),
            fetcher: fetcher.clone(),
            dispatch: sink.clone(),
            reauth: reauth.clone(),
            operator: sink.clone(),
        };
        let engine = NotificationEngine::new(
            SnapshotStore::new(),
            collaborators,
            Duration::from_secs(10),
        )
        .with_clock(first_of_september);

        Self {
            engine: Arc::new(engine),
            sessions,
            fetcher,
            sink,
            reauth,
            members: Arc::new(StaticMembers::default()),
        }
    }
}
