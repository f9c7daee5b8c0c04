//! SQLite-backed record store for agents, their state, and their run history.

mod agents;
mod runs;
pub mod types;

pub use types::{AgentPatch, AgentRecord, AgentStateRecord, RunRecord, RunStatus};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::AgentResult;
use crate::platform::{NativePlatform, Platform};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        agent_type TEXT NOT NULL DEFAULT 'default',
        config TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'inactive',
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agent_states (
        agent_id TEXT PRIMARY KEY,
        current_task TEXT,
        memory TEXT NOT NULL,
        last_active TEXT,
        FOREIGN KEY (agent_id) REFERENCES agents(agent_id)
    );

    CREATE TABLE IF NOT EXISTS agent_runs (
        run_id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        task TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        FOREIGN KEY (agent_id) REFERENCES agents(agent_id)
    );

    CREATE INDEX IF NOT EXISTS idx_agent_runs_agent_id ON agent_runs(agent_id, started_at);
";

const TABLES: &[&str] = &["agents", "agent_states", "agent_runs"];

/// Handle to the record store. Cheap to clone; every clone shares the same
/// connection. Each operation takes the connection lock for its whole
/// duration and commits before returning.
#[derive(Clone)]
pub struct AgentStore {
    db: Arc<Mutex<Connection>>,
}

impl AgentStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> AgentResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
            NativePlatform::restrict_dir_permissions(parent);
        }

        let db = Connection::open(db_path)?;
        NativePlatform::restrict_file_permissions(db_path);
        let store = Self::from_connection(db)?;
        info!("Record store opened at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> AgentResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> AgentResult<Self> {
        db.pragma_update(None, "foreign_keys", true)?;
        db.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Probe every table so a broken or foreign database fails loudly.
    pub async fn check_connection(&self) -> AgentResult<()> {
        let db = self.db.lock().await;
        for table in TABLES {
            let mut stmt = db.prepare(&format!("SELECT * FROM {table} LIMIT 1"))?;
            let mut rows = stmt.query([])?;
            rows.next()?;
        }
        Ok(())
    }
}

pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_has_all_tables() {
        let store = AgentStore::open_in_memory().unwrap();
        store.check_connection().await.unwrap();
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agents.db");
        let store = AgentStore::open(&path).await.unwrap();
        let id = store
            .create_agent(
                "persisted",
                "default",
                serde_json::json!({ "model_name": "m", "tools": [] }),
            )
            .await
            .unwrap();
        drop(store);

        let reopened = AgentStore::open(&path).await.unwrap();
        reopened.check_connection().await.unwrap();
        assert_eq!(reopened.get_agent(&id).await.unwrap().name, "persisted");
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(0, &format_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_ts(0, "yesterday").is_err());
    }
}
