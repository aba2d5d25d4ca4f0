use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn, Instrument};

use crate::action::ActionUrl;
use crate::claim::{Claim, ClaimStatus, ClaimStore, UnclaimedCase};
use crate::config::PersistenceConfig;
use crate::item::{CaseId, PatientId, ProviderId, QueueItem, Region, Role};
use crate::lease::WorkerLease;
use crate::picker::{NotifyCandidate, NotifyStateStore};
use crate::queue::{assign_positions, QueueStore};
use crate::runtime::ShutdownToken;
use crate::telemetry;
use crate::transition::{validate_batch, QueueTransition, TransitionOutcome};

/// Opens a connection pool sized by `config`.
pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(StdDuration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.connection_string)
        .await?;
    Ok(pool)
}

/// PostgreSQL-backed queues, jump-ball pool and notify state.
///
/// Each transition batch runs in one transaction holding a
/// transaction-scoped advisory lock on the provider, so concurrent batches
/// for the same provider serialize and dedupe checks cannot race.
#[derive(Clone, Debug)]
pub struct PgCareStore {
    pool: PgPool,
}

impl PgCareStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn insert_item(
        tx: &mut Transaction<'_, Postgres>,
        item: &QueueItem,
        dedupe: bool,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO care_queue_item (
                provider_id, patient_id, item_id, event_type, status,
                description, short_description, action_url, auth_url, tags, enqueued_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            WHERE NOT $12 OR NOT EXISTS (
                SELECT 1
                FROM care_queue_item
                WHERE provider_id = $1
                  AND item_id = $3
                  AND event_type = $4
                  AND status = $5
            )
            "#,
        )
        .bind(item.provider_id.get())
        .bind(item.patient_id.map(PatientId::get))
        .bind(item.item_id)
        .bind(item.event_type.as_str())
        .bind(item.status.as_str())
        .bind(&item.description)
        .bind(&item.short_description)
        .bind(item.action_url.map(|url| url.to_string()))
        .bind(item.auth_url.map(|url| url.to_string()))
        .bind(&item.tags)
        .bind(item.enqueued_at)
        .bind(dedupe)
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_matching(
        tx: &mut Transaction<'_, Postgres>,
        provider_id: ProviderId,
        item_id: i64,
        event_type: &str,
        status: &str,
    ) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM care_queue_item
            WHERE provider_id = $1
              AND item_id = $2
              AND event_type = $3
              AND status = $4
            "#,
        )
        .bind(provider_id.get())
        .bind(item_id)
        .bind(event_type)
        .bind(status)
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected())
    }

    async fn apply_locked(
        &self,
        provider_id: ProviderId,
        transitions: &[QueueTransition],
    ) -> anyhow::Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(provider_id.get())
            .execute(&mut *tx)
            .await?;

        let mut outcome = TransitionOutcome::default();
        for transition in transitions {
            match transition {
                QueueTransition::Insert { item, dedupe } => {
                    if Self::insert_item(&mut tx, item, *dedupe).await? {
                        outcome.inserted += 1;
                    } else {
                        outcome.deduplicated += 1;
                    }
                }
                QueueTransition::Remove { key } => {
                    let removed = Self::delete_matching(
                        &mut tx,
                        key.provider_id,
                        key.item_id,
                        key.event_type.as_str(),
                        key.status.as_str(),
                    )
                    .await?;
                    outcome.removed += removed as usize;
                }
                QueueTransition::Replace {
                    item,
                    required_current_status,
                } => {
                    let removed = Self::delete_matching(
                        &mut tx,
                        item.provider_id,
                        item.item_id,
                        item.event_type.as_str(),
                        required_current_status.as_str(),
                    )
                    .await?;
                    if removed == 0 {
                        outcome.precondition_misses += 1;
                    } else {
                        Self::insert_item(&mut tx, item, false).await?;
                        outcome.replaced += 1;
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn listing(&self, provider_id: ProviderId, open: bool) -> anyhow::Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT provider_id, patient_id, item_id, event_type, status,
                   description, short_description, action_url, auth_url, tags, enqueued_at
            FROM care_queue_item
            WHERE provider_id = $1
              AND (status IN ('PENDING', 'ONGOING')) = $2
            ORDER BY enqueued_at ASC, id ASC
            "#,
        )
        .bind(provider_id.get())
        .bind(open)
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows
            .iter()
            .map(item_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        assign_positions(&mut items);
        Ok(items)
    }
}

fn item_from_row(row: &PgRow) -> anyhow::Result<QueueItem> {
    let action_url: Option<String> = row.try_get("action_url")?;
    let auth_url: Option<String> = row.try_get("auth_url")?;
    let event_type: String = row.try_get("event_type")?;
    let status: String = row.try_get("status")?;
    let tags: Vec<String> = row.try_get("tags")?;

    let mut item = QueueItem::new(
        ProviderId(row.try_get("provider_id")?),
        row.try_get("item_id")?,
        event_type.parse()?,
        status.parse()?,
    )
    .with_description(
        row.try_get::<String, _>("description")?,
        row.try_get::<String, _>("short_description")?,
    )
    .with_tags(tags)
    .with_enqueued_at(row.try_get("enqueued_at")?);

    item.patient_id = row.try_get::<Option<i64>, _>("patient_id")?.map(PatientId);
    item.action_url = action_url.as_deref().map(str::parse::<ActionUrl>).transpose()?;
    item.auth_url = auth_url.as_deref().map(str::parse::<ActionUrl>).transpose()?;
    Ok(item)
}

fn case_from_row(row: &PgRow) -> anyhow::Result<UnclaimedCase> {
    Ok(UnclaimedCase {
        case_id: CaseId(row.try_get("case_id")?),
        patient_id: PatientId(row.try_get("patient_id")?),
        visit_id: row.try_get("visit_id")?,
        region: Region::new(row.try_get::<String, _>("region")?),
        description: row.try_get("description")?,
        short_description: row.try_get("short_description")?,
        tags: row.try_get("tags")?,
        enqueued_at: row.try_get("enqueued_at")?,
    })
}

fn claim_from_row(row: &PgRow) -> anyhow::Result<Claim> {
    let status: String = row.try_get("claim_status")?;
    Ok(Claim {
        case_id: CaseId(row.try_get("case_id")?),
        provider_id: row.try_get::<Option<i64>, _>("provider_id")?.map(ProviderId),
        status: ClaimStatus::parse(&status)?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl QueueStore for PgCareStore {
    async fn apply_transitions(
        &self,
        provider_id: ProviderId,
        transitions: Vec<QueueTransition>,
    ) -> anyhow::Result<TransitionOutcome> {
        if transitions.is_empty() {
            return Ok(TransitionOutcome::default());
        }
        validate_batch(provider_id, &transitions)?;

        let span = telemetry::apply_span(provider_id, transitions.len());
        let outcome = self.apply_locked(provider_id, &transitions).instrument(span).await?;
        telemetry::record_transitions_applied(provider_id, &outcome);
        Ok(outcome)
    }

    async fn pending_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>> {
        self.listing(provider_id, true).await
    }

    async fn completed_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>> {
        self.listing(provider_id, false).await
    }

    async fn unclaimed_eligible_items(
        &self,
        provider_id: ProviderId,
    ) -> anyhow::Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT u.case_id, u.patient_id, u.visit_id, u.region, u.description,
                   u.short_description, u.tags, u.enqueued_at
            FROM unclaimed_case u
            JOIN provider_region_licence l
              ON l.region = u.region
             AND l.provider_id = $1
            WHERE u.claim_status = 'UNCLAIMED'
               OR (u.claim_status = 'TEMP_CLAIMED'
                   AND (u.expires_at IS NULL OR u.expires_at < NOW() OR u.provider_id = $1))
            ORDER BY u.enqueued_at ASC, u.case_id ASC
            "#,
        )
        .bind(provider_id.get())
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows
            .iter()
            .map(|row| case_from_row(row).map(|case| case.to_queue_item(provider_id)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        assign_positions(&mut items);
        Ok(items)
    }
}

#[async_trait]
impl ClaimStore for PgCareStore {
    async fn insert_unclaimed(&self, case: UnclaimedCase) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO unclaimed_case (
                case_id, patient_id, visit_id, region, description,
                short_description, tags, enqueued_at, claim_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'UNCLAIMED')
            ON CONFLICT (case_id) DO NOTHING
            "#,
        )
        .bind(case.case_id.get())
        .bind(case.patient_id.get())
        .bind(case.visit_id)
        .bind(case.region.as_str())
        .bind(&case.description)
        .bind(&case.short_description)
        .bind(&case.tags)
        .bind(case.enqueued_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn load_claim(&self, case_id: CaseId) -> anyhow::Result<Option<Claim>> {
        let row = sqlx::query(
            r#"
            SELECT case_id, claim_status, provider_id, expires_at
            FROM unclaimed_case
            WHERE case_id = $1
            "#,
        )
        .bind(case_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(claim_from_row).transpose()
    }

    async fn swap_claim(&self, expected: &Claim, next: Claim) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            UPDATE unclaimed_case
            SET claim_status = $2,
                provider_id = $3,
                expires_at = $4
            WHERE case_id = $1
              AND claim_status = $5
              AND provider_id IS NOT DISTINCT FROM $6
              AND expires_at IS NOT DISTINCT FROM $7
            "#,
        )
        .bind(expected.case_id.get())
        .bind(next.status.as_str())
        .bind(next.provider_id.map(ProviderId::get))
        .bind(next.expires_at)
        .bind(expected.status.as_str())
        .bind(expected.provider_id.map(ProviderId::get))
        .bind(expected.expires_at)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let (ClaimStatus::PermanentlyAssigned, Some(provider_id)) = (next.status, next.provider_id) {
            sqlx::query(
                r#"
                UPDATE care_team_assignment
                SET active = FALSE
                WHERE case_id = $1
                  AND role = $2
                  AND provider_id <> $3
                "#,
            )
            .bind(expected.case_id.get())
            .bind(Role::Doctor.as_str())
            .bind(provider_id.get())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO care_team_assignment (case_id, provider_id, role, active, assigned_at)
                VALUES ($1, $2, $3, TRUE, NOW())
                ON CONFLICT (case_id, provider_id)
                DO UPDATE SET role = EXCLUDED.role, active = TRUE, assigned_at = NOW()
                "#,
            )
            .bind(expected.case_id.get())
            .bind(provider_id.get())
            .bind(Role::Doctor.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn regions_with_unclaimed_cases(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Region>> {
        let rows = sqlx::query(
            r#"
            SELECT region, MIN(enqueued_at) AS oldest
            FROM unclaimed_case
            WHERE claim_status = 'UNCLAIMED'
               OR (claim_status = 'TEMP_CLAIMED' AND (expires_at IS NULL OR expires_at < $1))
            GROUP BY region
            ORDER BY oldest ASC, region ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(Region::new(row.try_get::<String, _>("region")?)))
            .collect()
    }
}

#[async_trait]
impl NotifyStateStore for PgCareStore {
    async fn region_last_notified(
        &self,
        region: &Region,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_notified_at FROM region_notification WHERE region = $1",
        )
        .bind(region.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(at)
    }

    async fn notify_candidates(
        &self,
        region: &Region,
        regions_to_avoid: &[Region],
        notified_before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<NotifyCandidate>> {
        let avoid: Vec<String> = regions_to_avoid
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT l.provider_id, p.last_notified_at
            FROM provider_region_licence l
            LEFT JOIN provider_notification p ON p.provider_id = l.provider_id
            WHERE l.region = $1
              AND NOT EXISTS (
                  SELECT 1
                  FROM provider_region_licence a
                  WHERE a.provider_id = l.provider_id
                    AND a.region = ANY($2)
              )
              AND (p.last_notified_at IS NULL OR p.last_notified_at < $3)
            ORDER BY l.provider_id
            "#,
        )
        .bind(region.as_str())
        .bind(&avoid)
        .bind(notified_before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(NotifyCandidate {
                    provider_id: ProviderId(row.try_get("provider_id")?),
                    last_notified_at: row.try_get("last_notified_at")?,
                })
            })
            .collect()
    }

    async fn record_notified(
        &self,
        region: &Region,
        provider_id: ProviderId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO region_notification (region, last_notified_at)
            VALUES ($1, $2)
            ON CONFLICT (region) DO UPDATE SET last_notified_at = EXCLUDED.last_notified_at
            "#,
        )
        .bind(region.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO provider_notification (provider_id, last_notified_at)
            VALUES ($1, $2)
            ON CONFLICT (provider_id) DO UPDATE SET last_notified_at = EXCLUDED.last_notified_at
            "#,
        )
        .bind(provider_id.get())
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn eligible_providers(&self, region: &Region) -> anyhow::Result<Vec<ProviderId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT provider_id FROM provider_region_licence WHERE region = $1 ORDER BY provider_id",
        )
        .bind(region.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ProviderId).collect())
    }

    async fn set_eligible_providers(
        &self,
        region: &Region,
        providers: Vec<ProviderId>,
    ) -> anyhow::Result<()> {
        let ids: Vec<i64> = providers.into_iter().map(ProviderId::get).collect();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM provider_region_licence WHERE region = $1")
            .bind(region.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO provider_region_licence (region, provider_id)
            SELECT $1, UNNEST($2::bigint[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(region.as_str())
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// [`WorkerLease`] backed by a Postgres session advisory lock.
///
/// The lock lives on one pooled connection kept aside while the lease is
/// held; if that session dies the lock is released by the server.
pub struct PgAdvisoryLease {
    pool: PgPool,
    name: String,
    holder: String,
    poll_interval: StdDuration,
    conn: tokio::sync::Mutex<Option<PoolConnection<Postgres>>>,
}

impl std::fmt::Debug for PgAdvisoryLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgAdvisoryLease")
            .field("name", &self.name)
            .field("holder", &self.holder)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl PgAdvisoryLease {
    pub fn new(pool: PgPool, name: impl Into<String>, holder: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            holder: holder.into(),
            poll_interval: StdDuration::from_secs(1),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: StdDuration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl WorkerLease for PgAdvisoryLease {
    async fn acquire(&self, shutdown: &ShutdownToken) -> anyhow::Result<bool> {
        let mut held = self.conn.lock().await;
        if held.is_some() {
            return Ok(true);
        }

        loop {
            if shutdown.is_cancelled() {
                return Ok(false);
            }

            let mut conn = self.pool.acquire().await?;
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1)::bigint)")
                .bind(&self.name)
                .fetch_one(&mut *conn)
                .await?;
            if locked {
                debug!(lease = %self.name, holder = %self.holder, "advisory lease acquired");
                *held = Some(conn);
                return Ok(true);
            }
            drop(conn);

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn extend(&self) -> anyhow::Result<bool> {
        let mut held = self.conn.lock().await;
        let Some(conn) = held.as_mut() else {
            return Ok(false);
        };
        match sqlx::query("SELECT 1").execute(&mut **conn).await {
            Ok(_) => Ok(true),
            Err(err) => {
                warn!(lease = %self.name, error = %err, "advisory lease session lost");
                *held = None;
                Ok(false)
            }
        }
    }

    async fn release(&self) -> anyhow::Result<()> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        sqlx::query("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
            .bind(&self.name)
            .execute(&mut *conn)
            .await?;
        debug!(lease = %self.name, holder = %self.holder, "advisory lease released");
        Ok(())
    }

    fn holder(&self) -> &str {
        &self.holder
    }
}
