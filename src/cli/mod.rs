mod agent_cmd;
mod serve;

use anyhow::Result;
use console::style;
use std::sync::Arc;
use tracing::{Level, warn};

use crate::core::agent::KindRegistry;
use crate::core::config::Settings;
use crate::core::llm::providers::OpenAiProvider;
use crate::core::manager::AgentManager;
use crate::core::store::AgentStore;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Server")
        .command("serve", "Run the REST/WebSocket API until Ctrl+C")
        .text("Options: --api-host <host>  --api-port <port>")
        .print();

    GuideSection::new("Setup")
        .command("init", "Create the data directory and database")
        .print();

    GuideSection::new("Agents")
        .command("list", "List stored agents")
        .command("create", "Create an agent")
        .text("Options: --name <name>  --type <type>  --model <model>")
        .text("         --temperature <t>  --tool <type> (repeatable)")
        .command("runs <agent_id>", "Show run history of an agent")
        .command("run", "Start an agent in-process and run one task")
        .text("Options: --agent <id>  --task '<json>'")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("agent-manager").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub agent: String,
    pub task: String,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> RunCommandArgs {
    let mut agent = String::new();
    let mut task = String::new();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--agent" | "-a" => {
                if i + 1 < args.len() {
                    agent = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--task" | "-t" => {
                if i + 1 < args.len() {
                    task = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    RunCommandArgs { agent, task }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct CreateCommandArgs {
    pub name: String,
    pub agent_type: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub tools: Vec<String>,
}

pub(crate) fn parse_create_command_args(
    args: &[String],
    start: usize,
) -> Result<CreateCommandArgs, String> {
    let mut parsed = CreateCommandArgs::default();
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--name" | "-n", Some(v)) => {
                parsed.name = v;
                i += 2;
            }
            ("--type", Some(v)) => {
                parsed.agent_type = Some(v);
                i += 2;
            }
            ("--model" | "-m", Some(v)) => {
                parsed.model = Some(v);
                i += 2;
            }
            ("--temperature", Some(v)) => {
                let temperature = v
                    .parse()
                    .map_err(|_| format!("--temperature must be a number, got '{}'", v))?;
                parsed.temperature = Some(temperature);
                i += 2;
            }
            ("--tool", Some(v)) => {
                parsed.tools.push(v);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

/// Open the configured store and wire the manager to the LLM endpoint.
pub(crate) async fn build_manager(settings: &Settings) -> Result<AgentManager> {
    let store = match settings.database_path() {
        Some(path) => AgentStore::open(&path).await?,
        None => {
            warn!("DATABASE_URL points at an in-memory database; nothing will persist");
            AgentStore::open_in_memory()?
        }
    };

    let api_key = settings.llm.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; tasks will fail until it is configured");
    }
    let provider = OpenAiProvider::new(api_key, &settings.llm.base_url);
    Ok(AgentManager::new(
        store,
        KindRegistry::with_builtin(),
        Arc::new(provider),
    ))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let settings = Settings::load().await?;

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    if !matches!(cmd, "serve" | "help" | "--help" | "-h") {
        let (log_tx, _) = tokio::sync::broadcast::channel::<String>(16);
        crate::logging::init_tracing(Level::WARN, log_tx, false);
    }

    match cmd {
        "serve" => {
            let (api_host, api_port) = parse_api_server_flags(
                &args,
                2,
                settings.api.host.clone(),
                settings.api.port,
            );
            serve::run_server(settings, api_host, api_port).await
        }
        "init" => agent_cmd::run_init(&settings).await,
        "list" => agent_cmd::run_list(&settings).await,
        "create" => {
            let parsed = match parse_create_command_args(&args, 2) {
                Ok(parsed) => parsed,
                Err(msg) => {
                    print_error(&format!("Error: {}", msg));
                    return Ok(());
                }
            };
            if parsed.name.trim().is_empty() {
                print_error("Error: --name is required.");
                print_help();
                return Ok(());
            }
            agent_cmd::run_create(&settings, parsed).await
        }
        "runs" => match args.get(2) {
            Some(agent_id) => agent_cmd::run_runs(&settings, agent_id).await,
            None => {
                print_error("Error: runs needs an agent id.");
                Ok(())
            }
        },
        "run" => {
            let parsed = parse_run_command_args(&args, 2);
            if parsed.agent.is_empty() || parsed.task.is_empty() {
                print_error("Error: --agent and --task are required for run.");
                print_help();
                return Ok(());
            }
            agent_cmd::run_once(&settings, &parsed.agent, &parsed.task).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
