//! Periodic re-checks of every subscribed child, one loop per tier.
//!
//! Each [`TierScheduler`] wakes on its tier's cadence, re-queries the tier's
//! members and runs [`NotificationEngine::check`] for each of them. Checks in
//! one cycle run concurrently (bounded by a semaphore) but a child listed twice
//! is only checked once, and the next cycle never starts before the current one
//! has drained. A failing or panicking check only affects its own child.
//!
//! [`Notifier`] owns the per-tier loops. [`Notifier::stop`] cancels them and
//! waits, so a cycle that is already running finishes before shutdown returns.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::engine::{CheckOutcome, NotificationEngine};
use crate::models::{Entity, Tier};
use crate::providers::MembershipProvider;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub notified: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: &CheckOutcome) {
        self.checked += 1;
        match outcome {
            CheckOutcome::Notified { .. } | CheckOutcome::PeriodRolledOver { .. } => {
                self.notified += 1
            }
            CheckOutcome::NoSession => self.skipped += 1,
            CheckOutcome::Failed(_) => self.failed += 1,
            CheckOutcome::Baselined | CheckOutcome::Unchanged => {}
        }
    }
}

pub struct TierScheduler {
    tier: Tier,
    members: Arc<dyn MembershipProvider>,
    engine: Arc<NotificationEngine>,
    max_concurrent: usize,
}

impl TierScheduler {
    pub fn new(
        tier: Tier,
        members: Arc<dyn MembershipProvider>,
        engine: Arc<NotificationEngine>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            tier,
            members,
            engine,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Runs cycles on the tier cadence until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let cadence = self.tier.cadence;
        let mut ticks = interval_at(Instant::now() + cadence, cadence);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tier = %self.tier.name, cadence_secs = cadence.as_secs(), "tier scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {
                    let summary = self.run_cycle().await;
                    debug!(tier = %self.tier.name, ?summary, "tier cycle finished");
                }
            }
        }

        info!(tier = %self.tier.name, "tier scheduler stopped");
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let span = info_span!("tier_cycle", tier = %self.tier.name, cycle = %Uuid::new_v4());
        self.check_members().instrument(span).await
    }

    async fn check_members(&self) -> CycleSummary {
        let members = match self.members.members(&self.tier).await {
            Ok(members) => members,
            Err(err) => {
                warn!(%err, "skipping cycle");
                return CycleSummary::default();
            }
        };

        let mut seen = HashSet::new();
        let members: Vec<Entity> = members
            .into_iter()
            .filter(|entity| seen.insert(entity.id))
            .collect();
        debug!(members = members.len(), "checking tier members");

        let limiter = Arc::new(Semaphore::new(self.max_concurrent));
        let mut checks = JoinSet::new();
        for entity in members {
            let engine = Arc::clone(&self.engine);
            let limiter = Arc::clone(&limiter);
            checks.spawn(
                async move {
                    let _permit = limiter.acquire_owned().await;
                    engine.check(&entity).await
                }
                .in_current_span(),
            );
        }

        let mut summary = CycleSummary::default();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(err) => {
                    error!(%err, "entity check aborted");
                    summary.checked += 1;
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Lifecycle owner for all tier schedulers.
pub struct Notifier {
    engine: Arc<NotificationEngine>,
    members: Arc<dyn MembershipProvider>,
    max_concurrent: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
    running: HashSet<String>,
}

impl Notifier {
    pub fn new(
        engine: Arc<NotificationEngine>,
        members: Arc<dyn MembershipProvider>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            members,
            max_concurrent,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: HashSet::new(),
        }
    }

    pub fn engine(&self) -> &Arc<NotificationEngine> {
        &self.engine
    }

    /// Captures silent baselines for every current member of `tiers`.
    pub async fn enroll_all(&self, tiers: &[Tier]) -> usize {
        let mut enrolled = 0;
        for tier in tiers {
            let members = match self.members.members(tier).await {
                Ok(members) => members,
                Err(err) => {
                    warn!(tier = %tier.name, %err, "could not enroll tier members");
                    continue;
                }
            };
            for entity in members {
                if self.engine.enroll(&entity).await {
                    enrolled += 1;
                }
            }
        }
        info!(enrolled, "enrollment finished");
        enrolled
    }

    /// Spawns a loop for each tier that is not already running.
    pub fn start(&mut self, tiers: &[Tier]) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
            self.tracker = TaskTracker::new();
            self.running.clear();
        }

        for tier in tiers {
            if !self.running.insert(tier.name.clone()) {
                warn!(tier = %tier.name, "tier scheduler already running");
                continue;
            }
            let scheduler = TierScheduler::new(
                tier.clone(),
                Arc::clone(&self.members),
                Arc::clone(&self.engine),
                self.max_concurrent,
            );
            self.tracker.spawn(scheduler.run(self.cancel.child_token()));
        }
    }

    /// Stops every tier loop, letting in-flight cycles finish first.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.running.clear();
        info!("all tier schedulers stopped");
    }
}
