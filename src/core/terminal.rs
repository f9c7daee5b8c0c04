use console::{Emoji, style};

use crate::core::store::{AgentRecord, RunRecord, RunStatus};
use crate::core::agent::AgentStatus;

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_banner() {
    println!();
    println!("{}", style("agent-manager").bold().cyan());
    println!("{}\n", style("Create, start and task LLM agents.").dim());
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Agent manager stopped.").bold().cyan());
}

pub fn print_agents(agents: &[AgentRecord]) {
    if agents.is_empty() {
        print_info("No agents yet.");
        return;
    }
    println!(
        "  {:<36}  {:<20}  {:<12}  {:<8}  {}",
        style("ID").bold(),
        style("NAME").bold(),
        style("TYPE").bold(),
        style("STATUS").bold(),
        style("MODEL").bold()
    );
    for agent in agents {
        let status = match agent.status {
            AgentStatus::Active => style(agent.status.as_str()).green(),
            AgentStatus::Inactive => style(agent.status.as_str()).dim(),
        };
        println!(
            "  {:<36}  {:<20}  {:<12}  {:<8}  {}",
            agent.agent_id, agent.name, agent.agent_type, status, agent.config.model_name
        );
    }
}

pub fn print_runs(runs: &[RunRecord]) {
    if runs.is_empty() {
        print_info("No runs recorded.");
        return;
    }
    for run in runs {
        let status = match run.status {
            RunStatus::Completed => style(run.status.as_str()).green(),
            RunStatus::Failed => style(run.status.as_str()).red(),
            RunStatus::Running => style(run.status.as_str()).yellow(),
        };
        println!(
            "  {}  {:<9}  {}",
            style(run.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            status,
            run.run_id
        );
        println!("      task:   {}", run.task);
        if let Some(result) = &run.result {
            println!("      result: {}", result);
        }
    }
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Blank,
}

/// A titled block of help text, printed as one unit.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, about: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), about.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        for line in &self.lines {
            match line {
                GuideLine::Command(name, about) => {
                    println!("   {:<28} {}", style(name).green(), about)
                }
                GuideLine::Status(label, value) => print_status(label, value),
                GuideLine::Text(text) => println!("   {}", text),
                GuideLine::Blank => println!(),
            }
        }
    }
}
