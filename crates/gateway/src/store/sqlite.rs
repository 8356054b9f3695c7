//! SQLite-backed call store and agent directory

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info, warn};

use prixagent_conversation_core::store::apply_summary;
use prixagent_conversation_core::{
    AccountId, AgentDirectory, AgentId, AgentRecord, CallId, CallRecord, CallRecordStatus, CallStore,
    CallSummary, ConversationPhoneNumbers, Direction, NumberRoute, OrchestratorError, Result,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS calls (
        call_id TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL,
        agent_id TEXT,
        contact_id TEXT,
        campaign_id TEXT,
        phone_number TEXT,
        agent_phone_number TEXT,
        direction TEXT NOT NULL,
        call_type TEXT NOT NULL,
        status TEXT NOT NULL,
        duration_secs INTEGER,
        turn_count INTEGER,
        end_reason TEXT,
        provider_call_id TEXT,
        provider_conversation_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        ended_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_calls_provider_call_id ON calls(provider_call_id)",
    "CREATE INDEX IF NOT EXISTS idx_calls_status ON calls(status)",
    "CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        voice_id TEXT NOT NULL,
        prompt TEXT NOT NULL,
        first_message TEXT,
        language TEXT,
        provider_agent_id TEXT NOT NULL,
        phone_number_id TEXT,
        active BOOLEAN NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS number_routes (
        phone_number TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL,
        agent_id TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS call_summaries (
        call_id TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        contact_id TEXT,
        status TEXT NOT NULL,
        end_reason TEXT NOT NULL,
        duration_secs INTEGER NOT NULL,
        turn_count INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT NOT NULL,
        provider_conversation_id TEXT,
        transcript TEXT NOT NULL
    )",
];

const CALL_COLUMNS: &str = "call_id, account_id, agent_id, contact_id, campaign_id, phone_number, \
    agent_phone_number, direction, call_type, status, duration_secs, turn_count, end_reason, \
    provider_call_id, provider_conversation_id, created_at, updated_at, ended_at";

#[derive(FromRow, Debug)]
struct DbCall {
    call_id: String,
    account_id: String,
    agent_id: Option<String>,
    contact_id: Option<String>,
    campaign_id: Option<String>,
    phone_number: Option<String>,
    agent_phone_number: Option<String>,
    direction: String,
    call_type: String,
    status: String,
    duration_secs: Option<i64>,
    turn_count: Option<i64>,
    end_reason: Option<String>,
    provider_call_id: Option<String>,
    provider_conversation_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl DbCall {
    fn into_record(self) -> Result<CallRecord> {
        let direction = Direction::from_str(&self.direction).map_err(OrchestratorError::persistence)?;
        let status = CallRecordStatus::from_str(&self.status).map_err(OrchestratorError::persistence)?;
        Ok(CallRecord {
            call_id: CallId::from(self.call_id),
            account_id: AccountId::from(self.account_id),
            agent_id: self.agent_id.map(AgentId::from),
            contact_id: self.contact_id.map(Into::into),
            campaign_id: self.campaign_id.map(Into::into),
            phone_number: self.phone_number,
            agent_phone_number: self.agent_phone_number,
            direction,
            call_type: self.call_type,
            status,
            duration_secs: self.duration_secs.map(|d| d.max(0) as u64),
            turn_count: self.turn_count.map(|t| t.max(0) as usize),
            end_reason: self.end_reason,
            provider_call_id: self.provider_call_id,
            provider_conversation_id: self.provider_conversation_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ended_at: self.ended_at,
        })
    }
}

#[derive(FromRow, Debug)]
struct DbAgent {
    agent_id: String,
    account_id: String,
    name: String,
    voice_id: String,
    prompt: String,
    first_message: Option<String>,
    language: Option<String>,
    provider_agent_id: String,
    phone_number_id: Option<String>,
    active: bool,
}

impl From<DbAgent> for AgentRecord {
    fn from(row: DbAgent) -> Self {
        AgentRecord {
            agent_id: AgentId::from(row.agent_id),
            account_id: AccountId::from(row.account_id),
            name: row.name,
            voice_id: row.voice_id,
            prompt: row.prompt,
            first_message: row.first_message,
            language: row.language,
            provider_agent_id: row.provider_agent_id,
            phone_number_id: row.phone_number_id,
            active: row.active,
        }
    }
}

#[derive(FromRow, Debug)]
struct DbRoute {
    phone_number: String,
    account_id: String,
    agent_id: String,
}

fn db_err(e: sqlx::Error) -> OrchestratorError {
    OrchestratorError::persistence(e.to_string())
}

/// Call store over a SQLite pool
///
/// Implements both [`CallStore`] and [`AgentDirectory`]. The schema is created
/// on [`SqliteCallStore::connect`] and is safe to apply to an existing file.
#[derive(Clone)]
pub struct SqliteCallStore {
    pool: SqlitePool,
}

impl SqliteCallStore {
    /// Open (creating if missing) the database at `url` and bootstrap the schema
    pub async fn connect(url: &str, max_connections: u32) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Call store ready at {}", url);
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> std::result::Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Mark records a previous process left unfinished (`queued`, `initiated`,
    /// `ringing` or `in-progress`) as failed
    ///
    /// Returns how many records were closed.
    pub async fn reconcile_orphans(&self, reason: &str) -> std::result::Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE calls SET status = ?, end_reason = ?, ended_at = COALESCE(ended_at, ?), updated_at = ? \
             WHERE status IN (?, ?, ?, ?)",
        )
        .bind(CallRecordStatus::Failed.as_str())
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(CallRecordStatus::Queued.as_str())
        .bind(CallRecordStatus::Initiated.as_str())
        .bind(CallRecordStatus::Ringing.as_str())
        .bind(CallRecordStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        let closed = result.rows_affected();
        if closed > 0 {
            warn!("Marked {} orphaned call record(s) failed: {}", closed, reason);
        }
        Ok(closed)
    }

    pub async fn upsert_agent(&self, agent: &AgentRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents (agent_id, account_id, name, voice_id, prompt, first_message, language, \
             provider_agent_id, phone_number_id, active) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(agent_id) DO UPDATE SET account_id = excluded.account_id, name = excluded.name, \
             voice_id = excluded.voice_id, prompt = excluded.prompt, first_message = excluded.first_message, \
             language = excluded.language, provider_agent_id = excluded.provider_agent_id, \
             phone_number_id = excluded.phone_number_id, active = excluded.active",
        )
        .bind(agent.agent_id.as_str())
        .bind(agent.account_id.as_str())
        .bind(&agent.name)
        .bind(&agent.voice_id)
        .bind(&agent.prompt)
        .bind(&agent.first_message)
        .bind(&agent.language)
        .bind(&agent.provider_agent_id)
        .bind(&agent.phone_number_id)
        .bind(agent.active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn upsert_route(&self, route: &NumberRoute) -> Result<()> {
        sqlx::query(
            "INSERT INTO number_routes (phone_number, account_id, agent_id) VALUES (?, ?, ?) \
             ON CONFLICT(phone_number) DO UPDATE SET account_id = excluded.account_id, agent_id = excluded.agent_id",
        )
        .bind(&route.phone_number)
        .bind(route.account_id.as_str())
        .bind(route.agent_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn fetch_call<'e, E>(executor: E, call_id: &CallId) -> Result<Option<CallRecord>>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let row: Option<DbCall> = sqlx::query_as(&format!("SELECT {} FROM calls WHERE call_id = ?", CALL_COLUMNS))
            .bind(call_id.as_str())
            .fetch_optional(executor)
            .await
            .map_err(db_err)?;
        row.map(DbCall::into_record).transpose()
    }

    async fn write_call<'e, E>(executor: E, record: &CallRecord, replace: bool) -> std::result::Result<(), sqlx::Error>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        sqlx::query(&format!(
            "{} INTO calls ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            verb, CALL_COLUMNS
        ))
        .bind(record.call_id.as_str())
        .bind(record.account_id.as_str())
        .bind(record.agent_id.as_ref().map(|a| a.as_str().to_string()))
        .bind(record.contact_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(record.campaign_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(&record.phone_number)
        .bind(&record.agent_phone_number)
        .bind(record.direction.as_str())
        .bind(&record.call_type)
        .bind(record.status.as_str())
        .bind(record.duration_secs.map(|d| d as i64))
        .bind(record.turn_count.map(|t| t as i64))
        .bind(&record.end_reason)
        .bind(&record.provider_call_id)
        .bind(&record.provider_conversation_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.ended_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    fn require_row(call_id: &CallId, rows: u64) -> Result<()> {
        if rows == 0 {
            return Err(OrchestratorError::call_not_found(call_id));
        }
        Ok(())
    }
}

#[async_trait]
impl CallStore for SqliteCallStore {
    async fn find_call(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        Self::fetch_call(&self.pool, call_id).await
    }

    async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<CallRecord>> {
        let row: Option<DbCall> = sqlx::query_as(&format!(
            "SELECT {} FROM calls WHERE provider_call_id = ? LIMIT 1",
            CALL_COLUMNS
        ))
        .bind(provider_call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(DbCall::into_record).transpose()
    }

    async fn create_call(&self, record: CallRecord) -> Result<()> {
        Self::write_call(&self.pool, &record, false).await.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                OrchestratorError::persistence(format!("call record {} already exists", record.call_id))
            }
            other => db_err(other),
        })?;
        debug!("Created call record {}", record.call_id);
        Ok(())
    }

    async fn update_call_status(
        &self,
        call_id: &CallId,
        status: CallRecordStatus,
        duration_secs: Option<u64>,
    ) -> Result<()> {
        let now = Utc::now();
        let ended_at = status.is_terminal().then_some(now);
        let result = sqlx::query(
            "UPDATE calls SET status = ?, duration_secs = COALESCE(?, duration_secs), \
             ended_at = COALESCE(ended_at, ?), updated_at = ? WHERE call_id = ?",
        )
        .bind(status.as_str())
        .bind(duration_secs.map(|d| d as i64))
        .bind(ended_at)
        .bind(now)
        .bind(call_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Self::require_row(call_id, result.rows_affected())
    }

    async fn set_provider_ids(
        &self,
        call_id: &CallId,
        provider_call_id: Option<&str>,
        provider_conversation_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE calls SET provider_call_id = COALESCE(?, provider_call_id), \
             provider_conversation_id = COALESCE(?, provider_conversation_id), updated_at = ? WHERE call_id = ?",
        )
        .bind(provider_call_id)
        .bind(provider_conversation_id)
        .bind(Utc::now())
        .bind(call_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Self::require_row(call_id, result.rows_affected())
    }

    async fn update_phone_numbers(&self, call_id: &CallId, numbers: &ConversationPhoneNumbers) -> Result<()> {
        let result = sqlx::query(
            "UPDATE calls SET agent_phone_number = COALESCE(?, agent_phone_number), \
             phone_number = COALESCE(?, phone_number), direction = COALESCE(?, direction), updated_at = ? \
             WHERE call_id = ?",
        )
        .bind(&numbers.agent_phone_number)
        .bind(&numbers.contact_phone_number)
        .bind(numbers.direction.map(|d| d.as_str()))
        .bind(Utc::now())
        .bind(call_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Self::require_row(call_id, result.rows_affected())
    }

    async fn save_call_summary(&self, summary: &CallSummary) -> Result<()> {
        let transcript = serde_json::to_string(&summary.transcript)
            .map_err(|e| OrchestratorError::persistence(format!("transcript encoding: {}", e)))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Calls started straight through the API have no prior record
        let mut record = match Self::fetch_call(&mut *tx, &summary.call_id).await? {
            Some(record) => record,
            None => {
                let mut record = CallRecord::new(summary.call_id.clone(), summary.account_id.clone(), Direction::default());
                record.agent_id = Some(summary.agent_id.clone());
                record.contact_id = summary.contact_id.clone();
                record.status = CallRecordStatus::InProgress;
                record
            }
        };
        apply_summary(&mut record, summary);
        Self::write_call(&mut *tx, &record, true).await.map_err(db_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO call_summaries (call_id, account_id, agent_id, contact_id, status, end_reason, \
             duration_secs, turn_count, started_at, ended_at, provider_conversation_id, transcript) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(summary.call_id.as_str())
        .bind(summary.account_id.as_str())
        .bind(summary.agent_id.as_str())
        .bind(summary.contact_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(summary.status.as_str())
        .bind(&summary.end_reason)
        .bind(summary.duration_secs as i64)
        .bind(summary.turn_count as i64)
        .bind(summary.started_at)
        .bind(summary.ended_at)
        .bind(&summary.provider_conversation_id)
        .bind(transcript)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        debug!("Saved summary for call {} ({} turns)", summary.call_id, summary.turn_count);
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for SqliteCallStore {
    async fn find_agent(&self, account_id: &AccountId, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        let row: Option<DbAgent> = sqlx::query_as(
            "SELECT agent_id, account_id, name, voice_id, prompt, first_message, language, provider_agent_id, \
             phone_number_id, active FROM agents WHERE agent_id = ? AND account_id = ?",
        )
        .bind(agent_id.as_str())
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(AgentRecord::from))
    }

    async fn resolve_number(&self, phone_number: &str) -> Result<Option<NumberRoute>> {
        let row: Option<DbRoute> =
            sqlx::query_as("SELECT phone_number, account_id, agent_id FROM number_routes WHERE phone_number = ?")
                .bind(phone_number)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|r| NumberRoute {
            phone_number: r.phone_number,
            account_id: AccountId::from(r.account_id),
            agent_id: AgentId::from(r.agent_id),
        }))
    }
}
