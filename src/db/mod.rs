// Database access layer (SQLite via sqlx).

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::progression::ProgressionState;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProgressionRecord {
    pub player_id: String,
    pub state: String,
    pub updated_at: String,
}

pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every connection to an in-memory URL is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS progression (
                player_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Progression ───────────────────────────────────────────────────

    pub async fn create_player(&self, player_id: &str) -> Result<(), sqlx::Error> {
        self.save_progression(player_id, &ProgressionState::default())
            .await
    }

    pub async fn player_exists(&self, player_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT player_id FROM progression WHERE player_id = ?")
                .bind(player_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn get_progression_record(
        &self,
        player_id: &str,
    ) -> Result<Option<ProgressionRecord>, sqlx::Error> {
        let row = sqlx::query_as::<_, ProgressionRecord>(
            "SELECT player_id, state, updated_at FROM progression WHERE player_id = ?",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Load a player's progression. A missing or undecodable record yields
    /// a fresh state.
    pub async fn load_progression(&self, player_id: &str) -> Result<ProgressionState, sqlx::Error> {
        let Some(record) = self.get_progression_record(player_id).await? else {
            return Ok(ProgressionState::default());
        };
        match serde_json::from_str(&record.state) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(
                    player_id,
                    "Corrupt progression record, starting fresh: {e}"
                );
                Ok(ProgressionState::default())
            }
        }
    }

    /// Replace the whole progression document for a player.
    pub async fn save_progression(
        &self,
        player_id: &str,
        state: &ProgressionState,
    ) -> Result<(), sqlx::Error> {
        let json = serde_json::to_string(state).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO progression (player_id, state, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(player_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(player_id)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
