use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use super::types::{AgentStateRecord, RunRecord, RunStatus};
use super::{AgentStore, now_ts, parse_json, parse_opt_ts, parse_ts};
use crate::core::error::{AgentError, AgentResult};

const RUN_COLUMNS: &str = "run_id, agent_id, task, status, result, started_at, completed_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let task: String = row.get(2)?;
    let status: String = row.get(3)?;
    let result: Option<String> = row.get(4)?;
    let started_at: String = row.get(5)?;
    Ok(RunRecord {
        run_id: row.get(0)?,
        agent_id: row.get(1)?,
        task: parse_json(2, &task)?,
        status: RunStatus::from_status(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown run status '{status}'").into(),
            )
        })?,
        result: result.map(|r| parse_json(4, &r)).transpose()?,
        started_at: parse_ts(5, &started_at)?,
        completed_at: parse_opt_ts(6, row.get(6)?)?,
    })
}

impl AgentStore {
    /// First half of the two-phase run write: the row becomes visible as
    /// `running` before the handle is invoked.
    pub async fn record_run_start(&self, run_id: &str, agent_id: &str, task: &Value) -> AgentResult<()> {
        let task_json = serde_json::to_string(task)?;
        let now = now_ts();

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let touched = tx.execute(
            "UPDATE agent_states SET current_task = ?1, last_active = ?2 WHERE agent_id = ?3",
            params![task_json, now, agent_id],
        )?;
        if touched == 0 {
            return Err(AgentError::NotFound(agent_id.to_string()));
        }
        tx.execute(
            "INSERT INTO agent_runs (run_id, agent_id, task, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, agent_id, task_json, RunStatus::Running.as_str(), now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Second half: move a running row to its terminal status exactly once.
    pub async fn record_run_end(&self, run_id: &str, status: RunStatus, result: &Value) -> AgentResult<()> {
        if !status.is_terminal() {
            return Err(AgentError::Validation(format!(
                "run {run_id} must end in a terminal status, got '{}'",
                status.as_str()
            )));
        }
        let result_json = serde_json::to_string(result)?;
        let now = now_ts();

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let updated = tx.execute(
            "UPDATE agent_runs SET status = ?1, result = ?2, completed_at = ?3
             WHERE run_id = ?4 AND status = 'running'",
            params![status.as_str(), result_json, now, run_id],
        )?;
        if updated == 0 {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM agent_runs WHERE run_id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match current {
                None => AgentError::RunNotFound(run_id.to_string()),
                Some(current) => {
                    AgentError::Validation(format!("run {run_id} already finished as '{current}'"))
                }
            });
        }
        tx.execute(
            "UPDATE agent_states SET current_task = NULL, last_active = ?1
             WHERE agent_id = (SELECT agent_id FROM agent_runs WHERE run_id = ?2)",
            params![now, run_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> AgentResult<RunRecord> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM agent_runs WHERE run_id = ?1"),
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or_else(|| AgentError::RunNotFound(run_id.to_string()))
    }

    /// Newest first.
    pub async fn list_runs(&self, agent_id: &str, limit: usize) -> AgentResult<Vec<RunRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs WHERE agent_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![agent_id, limit as i64], run_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn get_state(&self, agent_id: &str) -> AgentResult<AgentStateRecord> {
        let db = self.db.lock().await;
        db.query_row(
            "SELECT agent_id, current_task, memory, last_active FROM agent_states WHERE agent_id = ?1",
            params![agent_id],
            |row| {
                let current_task: Option<String> = row.get(1)?;
                let memory: String = row.get(2)?;
                Ok(AgentStateRecord {
                    agent_id: row.get(0)?,
                    current_task: current_task.map(|t| parse_json(1, &t)).transpose()?,
                    memory: parse_json(2, &memory)?,
                    last_active: parse_opt_ts(3, row.get(3)?)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))
    }

    pub async fn save_state(&self, agent_id: &str, memory: &Value) -> AgentResult<()> {
        let memory_json = serde_json::to_string(memory)?;
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE agent_states SET memory = ?1, last_active = ?2 WHERE agent_id = ?3",
            params![memory_json, now_ts(), agent_id],
        )?;
        if rows == 0 {
            return Err(AgentError::NotFound(agent_id.to_string()));
        }
        Ok(())
    }
}
