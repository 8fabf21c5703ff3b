use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use shared_types::{
    Escalation, EscalationReason, EscalationStatus, NewEscalation, Priority, RunFeedback,
    RunRecord, RunStatus, RunTermination, Step, TriggerKind, WorkflowType,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use super::{
    apply_termination, validate_feedback, EscalationCreated, EscalationFilter, EscalationStore,
    EscalationUpdate, RunFilter, RunLog, StoreError, StoreResult,
};

/// SQLite-backed run log and escalation store.
///
/// Schema (created on [`SqliteStore::migrate`]):
/// ```sql
/// CREATE TABLE IF NOT EXISTS runs (id TEXT PRIMARY KEY, ..., steps TEXT NOT NULL, ...);
/// CREATE TABLE IF NOT EXISTS escalations (id TEXT PRIMARY KEY,
///     idempotency_key TEXT NOT NULL UNIQUE, ...);
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

const RUN_COLUMNS: &str = "id, organization_id, workflow_type, trigger_kind, trigger_id, status, \
     steps, total_tokens, final_action, escalation_id, error, feedback, created_at, completed_at";

const ESCALATION_COLUMNS: &str = "id, idempotency_key, organization_id, run_id, work_order_id, \
     reason, description, context, suggested_action, priority, status, assigned_to, resolution, \
     resolved_by, created_at, updated_at, resolved_at";

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url` and migrate.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = if database_url.contains(":memory:") {
            SqliteConnectOptions::from_str(database_url)?
        } else {
            let file_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StoreError::Database(e.to_string()))?;
                }
            }
            SqliteConnectOptions::new()
                .filename(file_path)
                .create_if_missing(true)
        };

        // In-memory databases are per connection, so keep exactly one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Create the runs and escalations tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS runs (
                id              TEXT    PRIMARY KEY,
                organization_id TEXT    NOT NULL,
                workflow_type   TEXT    NOT NULL,
                trigger_kind    TEXT    NOT NULL,
                trigger_id      TEXT,
                status          TEXT    NOT NULL,
                steps           TEXT    NOT NULL DEFAULT '[]',
                total_tokens    INTEGER NOT NULL DEFAULT 0,
                final_action    TEXT,
                escalation_id   TEXT,
                error           TEXT,
                feedback        TEXT,
                created_at      TEXT    NOT NULL,
                completed_at    TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS runs_status ON runs (status, created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS escalations (
                id               TEXT PRIMARY KEY,
                idempotency_key  TEXT NOT NULL UNIQUE,
                organization_id  TEXT NOT NULL,
                run_id           TEXT,
                work_order_id    TEXT,
                reason           TEXT NOT NULL,
                description      TEXT NOT NULL,
                context          TEXT NOT NULL,
                suggested_action TEXT,
                priority         TEXT NOT NULL,
                status           TEXT NOT NULL,
                assigned_to      TEXT,
                resolution       TEXT,
                resolved_by      TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                resolved_at      TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS escalations_org_status ON escalations (organization_id, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_run(&self, run: &RunRecord) -> StoreResult<()> {
        let steps = serde_json::to_string(&run.steps)?;
        let feedback = run
            .feedback
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO runs (id, organization_id, workflow_type, trigger_kind, trigger_id, status,
                               steps, total_tokens, final_action, escalation_id, error, feedback,
                               created_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                steps = excluded.steps,
                total_tokens = excluded.total_tokens,
                final_action = excluded.final_action,
                escalation_id = excluded.escalation_id,
                error = excluded.error,
                feedback = excluded.feedback,
                completed_at = excluded.completed_at",
        )
        .bind(&run.id)
        .bind(&run.organization_id)
        .bind(run.workflow_type.as_str())
        .bind(run.trigger.as_str())
        .bind(&run.trigger_id)
        .bind(run.status.as_str())
        .bind(steps)
        .bind(i64::try_from(run.total_tokens).unwrap_or(i64::MAX))
        .bind(&run.final_action)
        .bind(&run.escalation_id)
        .bind(&run.error)
        .bind(feedback)
        .bind(format_time(run.created_at))
        .bind(run.completed_at.map(format_time))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn fetch_escalation(&self, id: &str) -> StoreResult<Option<Escalation>> {
        let row = sqlx::query(&format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(escalation_from_row).transpose()
    }
}

#[async_trait]
impl RunLog for SqliteStore {
    async fn create_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.upsert_run(run).await
    }

    async fn record_progress(
        &self,
        run_id: &str,
        steps: &[Step],
        total_tokens: u64,
    ) -> StoreResult<()> {
        let steps = serde_json::to_string(steps)?;
        let rows = sqlx::query(
            "UPDATE runs SET steps = ?, total_tokens = ? WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(steps)
        .bind(i64::try_from(total_tokens).unwrap_or(i64::MAX))
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return match self.fetch_run(run_id).await? {
                Some(_) => Err(StoreError::RunAlreadyTerminal(run_id.to_string())),
                None => Err(StoreError::not_found("run", run_id)),
            };
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: &str,
        termination: &RunTermination,
        now: DateTime<Utc>,
    ) -> StoreResult<RunRecord> {
        let mut run = self
            .fetch_run(run_id)
            .await?
            .ok_or_else(|| StoreError::not_found("run", run_id))?;
        apply_termination(&mut run, termination, now)?;

        // Conditional on RUNNING so a concurrent finisher cannot overwrite.
        let rows = sqlx::query(
            "UPDATE runs SET status = ?, final_action = ?, escalation_id = ?, error = ?,
                             completed_at = ?
             WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(run.status.as_str())
        .bind(&run.final_action)
        .bind(&run.escalation_id)
        .bind(&run.error)
        .bind(run.completed_at.map(format_time))
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::RunAlreadyTerminal(run_id.to_string()));
        }
        Ok(run)
    }

    async fn run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        self.fetch_run(run_id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>> {
        let mut sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE 1 = 1");
        if filter.organization_id.is_some() {
            sql.push_str(" AND organization_id = ?");
        }
        if filter.workflow_type.is_some() {
            sql.push_str(" AND workflow_type = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(org) = &filter.organization_id {
            query = query.bind(org);
        }
        if let Some(workflow) = filter.workflow_type {
            query = query.bind(workflow.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn add_feedback(&self, run_id: &str, feedback: RunFeedback) -> StoreResult<RunRecord> {
        let mut run = self
            .fetch_run(run_id)
            .await?
            .ok_or_else(|| StoreError::not_found("run", run_id))?;
        validate_feedback(&run, &feedback)?;

        sqlx::query("UPDATE runs SET feedback = ? WHERE id = ?")
            .bind(serde_json::to_string(&feedback)?)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        run.feedback = Some(feedback);
        Ok(run)
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<RunRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'RUNNING' AND created_at < ?"
        ))
        .bind(format_time(cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }
}

#[async_trait]
impl EscalationStore for SqliteStore {
    async fn create_escalation(
        &self,
        new: NewEscalation,
        now: DateTime<Utc>,
    ) -> StoreResult<EscalationCreated> {
        let escalation = new.into_escalation(now);
        let rows = sqlx::query(
            "INSERT OR IGNORE INTO escalations (id, idempotency_key, organization_id, run_id,
                 work_order_id, reason, description, context, suggested_action, priority, status,
                 assigned_to, resolution, resolved_by, created_at, updated_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?, NULL)",
        )
        .bind(&escalation.id)
        .bind(&escalation.idempotency_key)
        .bind(&escalation.organization_id)
        .bind(&escalation.run_id)
        .bind(&escalation.work_order_id)
        .bind(escalation.reason.as_str())
        .bind(&escalation.description)
        .bind(serde_json::to_string(&escalation.context)?)
        .bind(&escalation.suggested_action)
        .bind(escalation.priority.as_str())
        .bind(escalation.status.as_str())
        .bind(format_time(escalation.created_at))
        .bind(format_time(escalation.updated_at))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            return Ok(EscalationCreated {
                escalation,
                created: true,
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalations WHERE idempotency_key = ?"
        ))
        .bind(&escalation.idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(EscalationCreated {
            escalation: escalation_from_row(&row)?,
            created: false,
        })
    }

    async fn escalation(&self, id: &str) -> StoreResult<Option<Escalation>> {
        self.fetch_escalation(id).await
    }

    async fn list_escalations(&self, filter: &EscalationFilter) -> StoreResult<Vec<Escalation>> {
        let mut sql = format!("SELECT {ESCALATION_COLUMNS} FROM escalations WHERE 1 = 1");
        if filter.organization_id.is_some() {
            sql.push_str(" AND organization_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.priority.is_some() {
            sql.push_str(" AND priority = ?");
        }
        if filter.reason.is_some() {
            sql.push_str(" AND reason = ?");
        }
        if filter.assigned_to.is_some() {
            sql.push_str(" AND assigned_to = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(org) = &filter.organization_id {
            query = query.bind(org);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            query = query.bind(priority.as_str());
        }
        if let Some(reason) = filter.reason {
            query = query.bind(reason.as_str());
        }
        if let Some(assignee) = &filter.assigned_to {
            query = query.bind(assignee);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(escalation_from_row).collect()
    }

    async fn update_escalation(
        &self,
        id: &str,
        update: EscalationUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Escalation> {
        let mut escalation = self
            .fetch_escalation(id)
            .await?
            .ok_or_else(|| StoreError::not_found("escalation", id))?;
        let previous_status = escalation.status;
        update.apply(&mut escalation, now)?;

        let rows = sqlx::query(
            "UPDATE escalations SET status = ?, assigned_to = ?, resolution = ?, resolved_by = ?,
                                    updated_at = ?, resolved_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(escalation.status.as_str())
        .bind(&escalation.assigned_to)
        .bind(&escalation.resolution)
        .bind(&escalation.resolved_by)
        .bind(format_time(escalation.updated_at))
        .bind(escalation.resolved_at.map(format_time))
        .bind(id)
        .bind(previous_status.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::InvalidEscalationUpdate(format!(
                "escalation {id} changed concurrently"
            )));
        }
        Ok(escalation)
    }
}

// ============================================================================
// Row decoding
// ============================================================================

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn parse_optional_time(raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

fn decode<T>(column: &str, raw: &str, parsed: Option<T>) -> StoreResult<T> {
    parsed.ok_or_else(|| StoreError::Serialization(format!("unknown {column} value '{raw}'")))
}

fn run_from_row(row: &SqliteRow) -> StoreResult<RunRecord> {
    let workflow: String = row.try_get("workflow_type")?;
    let trigger: String = row.try_get("trigger_kind")?;
    let status: String = row.try_get("status")?;
    let steps: String = row.try_get("steps")?;
    let feedback: Option<String> = row.try_get("feedback")?;
    let total_tokens: i64 = row.try_get("total_tokens")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(RunRecord {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        workflow_type: decode("workflow_type", &workflow, WorkflowType::parse(&workflow))?,
        trigger: decode("trigger_kind", &trigger, TriggerKind::parse(&trigger))?,
        trigger_id: row.try_get("trigger_id")?,
        status: decode("status", &status, RunStatus::parse(&status))?,
        steps: serde_json::from_str(&steps)?,
        total_tokens: total_tokens.max(0) as u64,
        final_action: row.try_get("final_action")?,
        escalation_id: row.try_get("escalation_id")?,
        error: row.try_get("error")?,
        feedback: feedback.as_deref().map(serde_json::from_str).transpose()?,
        created_at: parse_time(&created_at)?,
        completed_at: parse_optional_time(row.try_get("completed_at")?)?,
    })
}

fn escalation_from_row(row: &SqliteRow) -> StoreResult<Escalation> {
    let reason: String = row.try_get("reason")?;
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let context: String = row.try_get("context")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Escalation {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        organization_id: row.try_get("organization_id")?,
        run_id: row.try_get("run_id")?,
        work_order_id: row.try_get("work_order_id")?,
        reason: decode("reason", &reason, EscalationReason::parse(&reason))?,
        description: row.try_get("description")?,
        context: serde_json::from_str(&context)?,
        suggested_action: row.try_get("suggested_action")?,
        priority: decode("priority", &priority, Priority::parse(&priority))?,
        status: decode("status", &status, EscalationStatus::parse(&status))?,
        assigned_to: row.try_get("assigned_to")?,
        resolution: row.try_get("resolution")?,
        resolved_by: row.try_get("resolved_by")?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
        resolved_at: parse_optional_time(row.try_get("resolved_at")?)?,
    })
}
