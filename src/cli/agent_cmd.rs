use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::CreateCommandArgs;
use crate::core::config::Settings;
use crate::core::store::AgentStore;
use crate::core::terminal::{
    print_agents, print_info, print_runs, print_status, print_step, print_success,
};
use crate::platform::{NativePlatform, Platform};

const RUN_HISTORY_LIMIT: usize = 20;

pub async fn run_init(settings: &Settings) -> Result<()> {
    print_step("Initializing agent manager");
    tokio::fs::create_dir_all(&settings.data_dir)
        .await
        .with_context(|| format!("cannot create {}", settings.data_dir.display()))?;
    NativePlatform::restrict_dir_permissions(&settings.data_dir);
    print_status("Data dir", &settings.data_dir.display().to_string());

    let store = match settings.database_path() {
        Some(path) => {
            print_status("Database", &path.display().to_string());
            AgentStore::open(&path).await?
        }
        None => {
            print_info("Database is in-memory; nothing will persist.");
            AgentStore::open_in_memory()?
        }
    };
    store.check_connection().await?;
    print_success("Database tables are in place.");
    Ok(())
}

pub async fn run_list(settings: &Settings) -> Result<()> {
    let manager = super::build_manager(settings).await?;
    let agents = manager.list().await?;
    print_agents(&agents);
    Ok(())
}

pub async fn run_create(settings: &Settings, args: CreateCommandArgs) -> Result<()> {
    let config = json!({
        "model_name": args.model.unwrap_or_else(|| settings.llm.default_model.clone()),
        "temperature": args.temperature.unwrap_or(settings.llm.default_temperature),
        "tools": args.tools,
    });
    let manager = super::build_manager(settings).await?;
    let agent_id = manager
        .create(&args.name, args.agent_type.as_deref(), config)
        .await?;
    print_success(&format!("Created agent '{}'", args.name));
    print_status("ID", &agent_id);
    Ok(())
}

pub async fn run_runs(settings: &Settings, agent_id: &str) -> Result<()> {
    let manager = super::build_manager(settings).await?;
    let runs = manager.list_runs(agent_id, RUN_HISTORY_LIMIT).await?;
    print_runs(&runs);
    Ok(())
}

/// Start the agent in this process, run one task, and stop it again.
pub async fn run_once(settings: &Settings, agent_id: &str, task: &str) -> Result<()> {
    let task: Value = serde_json::from_str(task).context("--task must be a JSON object")?;
    let manager = super::build_manager(settings).await?;

    manager.start(agent_id).await?;
    let outcome = manager.run_task(agent_id, task).await;
    manager.stop(agent_id).await?;

    match outcome {
        Ok(outcome) => {
            print_success(&format!("Run {} completed", outcome.run_id));
            match outcome.result.get("output").and_then(Value::as_str) {
                Some(text) => println!("\n{}\n", text),
                None => println!("\n{}\n", serde_json::to_string_pretty(&outcome.result)?),
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
