use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;
use tracing::info;

use super::types::{AgentPatch, AgentRecord};
use super::{AgentStore, now_ts, parse_json, parse_ts};
use crate::core::agent::{AgentConfig, AgentStatus, normalize_type, validate_name};
use crate::core::error::{AgentError, AgentResult};

const AGENT_COLUMNS: &str = "agent_id, name, agent_type, config, status, created_at";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    let config: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(AgentRecord {
        agent_id: row.get(0)?,
        name: row.get(1)?,
        agent_type: row.get(2)?,
        config: parse_json(3, &config)?,
        status: AgentStatus::from_status(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown agent status '{status}'").into(),
            )
        })?,
        created_at: parse_ts(5, &created_at)?,
    })
}

fn select_agent(db: &rusqlite::Connection, agent_id: &str) -> AgentResult<Option<AgentRecord>> {
    let record = db
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"),
            params![agent_id],
            agent_from_row,
        )
        .optional()?;
    Ok(record)
}

impl AgentStore {
    /// Insert an agent (status inactive) together with its empty state row.
    /// Nothing is written when validation fails.
    pub async fn create_agent(
        &self,
        name: &str,
        agent_type: &str,
        config: Value,
    ) -> AgentResult<String> {
        validate_name(name)?;
        let config = AgentConfig::from_value(config)?;
        let agent_type = normalize_type(Some(agent_type));
        let agent_id = uuid::Uuid::new_v4().to_string();
        let config_json = serde_json::to_string(&config)?;

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO agents (agent_id, name, agent_type, config, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent_id,
                name.trim(),
                agent_type,
                config_json,
                AgentStatus::Inactive.as_str(),
                now_ts()
            ],
        )?;
        tx.execute(
            "INSERT INTO agent_states (agent_id, memory) VALUES (?1, '{}')",
            params![agent_id],
        )?;
        tx.commit()?;

        info!("Created agent {} ({}, type={})", agent_id, name, agent_type);
        Ok(agent_id)
    }

    pub async fn get_agent(&self, agent_id: &str) -> AgentResult<AgentRecord> {
        let db = self.db.lock().await;
        select_agent(&db, agent_id)?.ok_or_else(|| AgentError::NotFound(agent_id.to_string()))
    }

    pub async fn list_agents(&self) -> AgentResult<Vec<AgentRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents"))?;
        let rows = stmt.query_map([], agent_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Apply a partial update and return the row as stored afterwards.
    pub async fn update_agent(&self, agent_id: &str, patch: AgentPatch) -> AgentResult<AgentRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut record =
            select_agent(&tx, agent_id)?.ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;

        if let Some(name) = patch.name {
            validate_name(&name)?;
            record.name = name.trim().to_string();
        }
        if let Some(agent_type) = patch.agent_type {
            record.agent_type = normalize_type(Some(&agent_type));
        }
        if let Some(config_patch) = patch.config {
            record.config = record.config.merged(&config_patch)?;
        }

        tx.execute(
            "UPDATE agents SET name = ?1, agent_type = ?2, config = ?3 WHERE agent_id = ?4",
            params![
                record.name,
                record.agent_type,
                serde_json::to_string(&record.config)?,
                agent_id
            ],
        )?;
        tx.commit()?;

        info!("Updated agent {}", agent_id);
        Ok(record)
    }

    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> AgentResult<()> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE agents SET status = ?1 WHERE agent_id = ?2",
            params![status.as_str(), agent_id],
        )?;
        if rows == 0 {
            return Err(AgentError::NotFound(agent_id.to_string()));
        }
        Ok(())
    }

    /// Remove runs, then state, then the agent row, in one transaction.
    pub async fn delete_agent(&self, agent_id: &str) -> AgentResult<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let exists: Option<String> = tx
            .query_row(
                "SELECT agent_id FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(AgentError::NotFound(agent_id.to_string()));
        }

        let runs = tx.execute(
            "DELETE FROM agent_runs WHERE agent_id = ?1",
            params![agent_id],
        )?;
        tx.execute(
            "DELETE FROM agent_states WHERE agent_id = ?1",
            params![agent_id],
        )?;
        tx.execute("DELETE FROM agents WHERE agent_id = ?1", params![agent_id])?;
        tx.commit()?;

        info!("Deleted agent {} ({} runs removed)", agent_id, runs);
        Ok(())
    }
}
