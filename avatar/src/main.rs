//! Unattended development-task agent.
//!
//! Polls the backend task queue and runs each task through the clone → generate
//! → commit → push pipeline against a local workspace.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use avatar::agent::{StartOutcome, SystemAgent};
use avatar::exit_codes;
use avatar::io::config::{AgentConfig, CONFIG_FILE, write_config};
use avatar::io::workspace::WorkspaceManager;
use avatar::logging;
use avatar::pipeline::TaskOutcome;
use avatar::poller::Shutdown;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "avatar",
    version,
    about = "Unattended development-task agent"
)]
struct Cli {
    /// Configuration file; `avatar.local.toml` next to it and `AVATAR_*` env vars override it.
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the backend, subscribe to the topic and process tasks until Ctrl-C.
    Run {
        /// Run a single poll cycle, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Run one task through the pipeline without polling.
    Exec {
        /// Backend task id.
        task_id: u64,
    },
    /// Print the agent status snapshot as JSON.
    Status,
    /// Remove every task scratch directory.
    Clean,
    /// Write a default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    if let Command::InitConfig { force } = cli.command {
        cmd_init_config(&cli.config, force)?;
        return Ok(exit_codes::OK);
    }

    let config = AgentConfig::load(&cli.config)
        .with_context(|| format!("load {}", cli.config.display()))?;
    let workspace = WorkspaceManager::open(&config.workspace.root)?;
    logging::init(Some(&workspace.process_log_path()))?;
    let mut agent = SystemAgent::from_config(config, workspace)?;

    match cli.command {
        Command::Run { once } => cmd_run(&mut agent, once),
        Command::Exec { task_id } => Ok(cmd_exec(&mut agent, task_id)),
        Command::Status => {
            let status = agent.status()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("serialize status")?
            );
            Ok(exit_codes::OK)
        }
        Command::Clean => {
            let removed = agent.clean()?;
            println!("removed {removed} scratch directories");
            Ok(exit_codes::OK)
        }
        Command::InitConfig { .. } => Ok(exit_codes::OK),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_run(agent: &mut SystemAgent, once: bool) -> Result<i32> {
    let shutdown = Shutdown::new();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.request();
    })
    .context("install Ctrl-C handler")?;

    let max_cycles = once.then_some(1);
    Ok(match agent.start(shutdown, max_cycles) {
        StartOutcome::Completed(summary) => {
            info!(
                cycles = summary.cycles,
                handled = summary.messages_handled,
                "agent exited"
            );
            exit_codes::OK
        }
        StartOutcome::BackendUnavailable => {
            eprintln!("backend unavailable");
            exit_codes::BACKEND_UNAVAILABLE
        }
        StartOutcome::SubscriptionFailed => {
            eprintln!("could not subscribe to the task topic");
            exit_codes::SUBSCRIPTION_FAILED
        }
    })
}

fn cmd_exec(agent: &mut SystemAgent, task_id: u64) -> i32 {
    match agent.run_task(task_id) {
        TaskOutcome::Done { files, duration } => {
            println!("task {task_id} done in {duration:.1}s: {}", files.join(", "));
            exit_codes::OK
        }
        TaskOutcome::Failed {
            step,
            error,
            duration,
        } => {
            eprintln!("task {task_id} failed at {step} after {duration:.1}s: {error}");
            exit_codes::TASK_FAILED
        }
        TaskOutcome::Skipped { status } => {
            println!("task {task_id} already {status}, skipped");
            exit_codes::OK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["avatar", "run"]);
        assert!(matches!(cli.command, Command::Run { once: false }));
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }

    #[test]
    fn parse_run_once_with_config() {
        let cli = Cli::parse_from(["avatar", "run", "--config", "/etc/avatar.toml", "--once"]);
        assert!(matches!(cli.command, Command::Run { once: true }));
        assert_eq!(cli.config, PathBuf::from("/etc/avatar.toml"));
    }

    #[test]
    fn parse_exec() {
        let cli = Cli::parse_from(["avatar", "exec", "42"]);
        assert!(matches!(cli.command, Command::Exec { task_id: 42 }));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["avatar", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }

    #[test]
    fn exec_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["avatar", "exec", "abc"]).is_err());
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        cmd_init_config(&path, false).expect("first write");
        assert!(cmd_init_config(&path, false).is_err());
        cmd_init_config(&path, true).expect("forced write");
        let loaded: AgentConfig =
            toml::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded, AgentConfig::default());
    }
}
