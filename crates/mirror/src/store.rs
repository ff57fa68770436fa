//! SQLite table of turns.

use std::{path::Path, str::FromStr};

use {
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    turn::{Turn, TurnStatus, decode_images, encode_images},
};

#[derive(sqlx::FromRow)]
struct TurnRow {
    id: String,
    content: String,
    sender: String,
    images: Option<String>,
    timestamp: i64,
    status: String,
    message_type: Option<String>,
}

impl TryFrom<TurnRow> for Turn {
    type Error = Error;

    fn try_from(row: TurnRow) -> Result<Self> {
        let sender = row
            .sender
            .parse()
            .map_err(|e: String| Error::corrupt(&row.id, e))?;
        let status = row
            .status
            .parse()
            .map_err(|e: String| Error::corrupt(&row.id, e))?;
        Ok(Self {
            images: decode_images(row.images.as_deref()),
            id: row.id,
            content: row.content,
            sender,
            timestamp: row.timestamp,
            status,
            message_type: row.message_type,
        })
    }
}

const COLUMNS: &str = "id, content, sender, images, timestamp, status, message_type";

/// Append-only store of [`Turn`]s keyed by id.
#[derive(Clone)]
pub struct TurnStore {
    pool: SqlitePool,
}

impl TurnStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        debug!(path = %path.display(), "opened turn store");
        Ok(Self { pool })
    }

    /// Use an existing pool. Migrations must already be applied.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new turn. Ids are unique; reinserting one is an error.
    pub async fn insert(&self, turn: &Turn) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO turns (id, content, sender, images, timestamp, status, message_type) \
             VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&turn.id)
        .bind(&turn.content)
        .bind(turn.sender.as_str())
        .bind(encode_images(&turn.images))
        .bind(turn.timestamp)
        .bind(turn.status.as_str())
        .bind(&turn.message_type)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::DuplicateTurn {
                id: turn.id.clone(),
            });
        }
        Ok(())
    }

    /// Move a `SENDING` turn to a terminal status. Terminal turns are never
    /// touched again; returns whether a row changed.
    pub async fn update_status(&self, id: &str, status: TurnStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE turns SET status = ? WHERE id = ? AND status = ?")
            .bind(status.as_str())
            .bind(id)
            .bind(TurnStatus::Sending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The `limit` most recent turns, newest first. Rows that no longer
    /// decode are logged and left out of the window.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Turn>> {
        let rows = sqlx::query_as::<_, TurnRow>(&format!(
            "SELECT {COLUMNS} FROM turns ORDER BY timestamp DESC, rowid DESC LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match Turn::try_from(row) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable turn");
                    None
                },
            })
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Turn>> {
        let row = sqlx::query_as::<_, TurnRow>(&format!("SELECT {COLUMNS} FROM turns WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Turn::try_from).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM turns")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Delete every turn. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM turns")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
