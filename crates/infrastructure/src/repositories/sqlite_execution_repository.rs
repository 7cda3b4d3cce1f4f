use anyhow::Result;
use async_trait::async_trait;
use domain::ports::ExecutionRepository;
use domain::{AutomationExecution, DomainError, ExecutionId, RoomId, RuleId};
use sqlx::{Pool, Sqlite, sqlite::SqlitePoolOptions};

/// Execution audit trail in SQLite. Each row keeps the lookup columns next
/// to the full execution as JSON.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: Pool<Sqlite>,
}

fn storage_error(e: impl std::fmt::Display) -> DomainError {
    DomainError::Repository(e.to_string())
}

impl SqliteExecutionRepository {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite is single-writer
            .connect(connection_string)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS automation_executions (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                status TEXT NOT NULL,
                executed_at INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_executions_rule
                ON automation_executions (rule_id, executed_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn decode(bodies: Vec<String>) -> Result<Vec<AutomationExecution>, DomainError> {
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(storage_error))
            .collect()
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn save(&self, execution: &AutomationExecution) -> Result<(), DomainError> {
        let body = serde_json::to_string(execution).map_err(storage_error)?;
        // Upsert in place so the rowid keeps insertion order
        sqlx::query(
            "INSERT INTO automation_executions (id, rule_id, room_id, status, executed_at, body)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, body = excluded.body",
        )
        .bind(execution.id.to_string())
        .bind(execution.rule_id.as_str())
        .bind(execution.room_id.as_str())
        .bind(execution.status.as_str())
        .bind(execution.executed_at.timestamp_millis())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<AutomationExecution>, DomainError> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM automation_executions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        body.map(|b| serde_json::from_str(&b).map_err(storage_error))
            .transpose()
    }

    async fn find_last_for_rule(
        &self,
        rule_id: &RuleId,
    ) -> Result<Option<AutomationExecution>, DomainError> {
        Ok(self.find_by_rule(rule_id, 1).await?.into_iter().next())
    }

    async fn find_by_rule(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<AutomationExecution>, DomainError> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM automation_executions WHERE rule_id = ?
             ORDER BY executed_at DESC, rowid DESC LIMIT ?",
        )
        .bind(rule_id.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Self::decode(bodies)
    }

    async fn find_by_room(&self, room_id: &RoomId) -> Result<Vec<AutomationExecution>, DomainError> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM automation_executions WHERE room_id = ?
             ORDER BY executed_at DESC, rowid DESC",
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Self::decode(bodies)
    }
}
