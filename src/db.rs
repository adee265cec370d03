use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::diary::DiarySession;
use crate::error::{DispatchError, MembershipError};
use crate::models::{Entity, EntityId, Tier};
use crate::providers::{
    DispatchSink, MembershipProvider, OperatorSink, ReauthTrigger, SessionProvider,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        owner_id: i64,
        recipient_id: i64,
        diary_session: String,
        child_index: i32,
        pupil_id: i64,
        child_name: String,
        tier: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        sqlx::query(
            r#"
            INSERT INTO diary_notify.users (owner_id, recipient_id, diary_session, needs_reauth)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (owner_id) DO UPDATE
            SET recipient_id = EXCLUDED.recipient_id,
                diary_session = EXCLUDED.diary_session,
                needs_reauth = FALSE
            "#,
        )
        .bind(row.owner_id)
        .bind(row.recipient_id)
        .bind(&row.diary_session)
        .execute(pool)
        .await?;

        let tier = row.tier.unwrap_or_else(|| "default".to_string());
        // xmax = 0 only for freshly inserted rows.
        let fresh: bool = sqlx::query(
            r#"
            INSERT INTO diary_notify.children
            (owner_id, child_index, pupil_id, child_name, tier, marks_notify)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (owner_id, child_index) DO UPDATE
            SET pupil_id = EXCLUDED.pupil_id,
                child_name = EXCLUDED.child_name,
                tier = EXCLUDED.tier,
                marks_notify = TRUE
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(row.owner_id)
        .bind(row.child_index)
        .bind(row.pupil_id)
        .bind(&row.child_name)
        .bind(&tier)
        .fetch_one(pool)
        .await?
        .try_get("inserted")?;

        if fresh {
            inserted += 1;
        }
    }

    Ok(inserted)
}

fn entity_from_row(row: &PgRow) -> sqlx::Result<Entity> {
    let tracked: i64 = row.try_get("tracked")?;
    let child_name: String = row.try_get("child_name")?;
    Ok(Entity {
        id: EntityId {
            owner_id: row.try_get("owner_id")?,
            child_index: row.try_get("child_index")?,
        },
        recipient_id: row.try_get("recipient_id")?,
        display_name: (tracked > 1).then_some(child_name),
        tier: row.try_get("tier")?,
    })
}

/// Subscriptions, sessions and re-auth flags stored in Postgres.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_session(&self, owner_id: i64) -> sqlx::Result<Option<DiarySession>> {
        let Some(user) = sqlx::query(
            "SELECT diary_session, needs_reauth FROM diary_notify.users WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let needs_reauth: bool = user.try_get("needs_reauth")?;
        if needs_reauth {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT child_index, pupil_id FROM diary_notify.children WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut pupils: BTreeMap<i32, i64> = BTreeMap::new();
        for row in rows {
            pupils.insert(row.try_get("child_index")?, row.try_get("pupil_id")?);
        }

        Ok(Some(DiarySession::new(
            user.try_get::<String, _>("diary_session")?,
            pupils,
        )))
    }
}

#[async_trait]
impl MembershipProvider for PgDirectory {
    async fn members(&self, tier: &Tier) -> Result<Vec<Entity>, MembershipError> {
        let rows = sqlx::query(
            r#"
            SELECT c.owner_id, c.child_index, c.child_name, c.tier, u.recipient_id,
                   (SELECT COUNT(*) FROM diary_notify.children s WHERE s.owner_id = c.owner_id)
                       AS tracked
            FROM diary_notify.children c
            JOIN diary_notify.users u ON u.owner_id = c.owner_id
            WHERE c.marks_notify AND c.tier = $1
            ORDER BY c.owner_id, c.child_index
            "#,
        )
        .bind(&tier.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| MembershipError(err.to_string()))?;

        rows.iter()
            .map(entity_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(|err| MembershipError(err.to_string()))
    }
}

#[async_trait]
impl SessionProvider for PgDirectory {
    async fn get_session(&self, owner_id: i64) -> Option<DiarySession> {
        match self.load_session(owner_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(owner = owner_id, %err, "failed to load diary session");
                None
            }
        }
    }
}

impl ReauthTrigger for PgDirectory {
    fn request_reauth(&self, owner_id: i64) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result =
                sqlx::query("UPDATE diary_notify.users SET needs_reauth = TRUE WHERE owner_id = $1")
                    .bind(owner_id)
                    .execute(&pool)
                    .await;
            if let Err(err) = result {
                warn!(owner = owner_id, %err, "failed to flag owner for re-auth");
            }
        });
    }
}

/// Outgoing messages queued for the chat transport.
#[derive(Clone)]
pub struct PgOutbox {
    pool: PgPool,
    operator_peer: Option<i64>,
}

impl PgOutbox {
    pub fn new(pool: PgPool, operator_peer: Option<i64>) -> Self {
        Self {
            pool,
            operator_peer,
        }
    }

    async fn enqueue(&self, recipient_id: i64, body: &str) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO diary_notify.outbox (id, recipient_id, body)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(recipient_id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DispatchSink for PgOutbox {
    async fn send(&self, recipient_id: i64, text: &str) -> Result<(), DispatchError> {
        self.enqueue(recipient_id, text)
            .await
            .map_err(|err| DispatchError(err.to_string()))
    }
}

#[async_trait]
impl OperatorSink for PgOutbox {
    async fn notify_operator(&self, text: &str) {
        warn!(alert = %text, "operator alert");
        let Some(peer) = self.operator_peer else {
            return;
        };
        if let Err(err) = self.enqueue(peer, text).await {
            warn!(%err, "failed to queue operator alert");
        }
    }
}
