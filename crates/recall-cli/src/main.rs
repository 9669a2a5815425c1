use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

mod commands;
mod config;
mod logging;

use commands::{Command, Context};
use config::{Overrides, RecallConfig};

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Lesson store with citation tracking for coding assistants", long_about = None)]
struct Cli {
    /// System lesson directory (overrides RECALL_BASE)
    #[arg(long, global = true, value_name = "DIR")]
    base: Option<PathBuf>,
    /// Project root (overrides RECALL_PROJECT_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

fn main() {
    if let Err(err) = run(Cli::parse()) {
        eprintln!("{}", error_line(&err));
        std::process::exit(1);
    }
}

/// The whole error chain on one line, without newlines from any cause.
fn error_line(err: &anyhow::Error) -> String {
    let line = format!("recall: {err:#}");
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn run(cli: Cli) -> Result<()> {
    if std::env::var("RECALL_ENABLED").is_ok_and(|value| config::is_falsy(&value)) {
        return Ok(());
    }

    let config = RecallConfig::from_env(&Overrides {
        base: cli.base,
        project: cli.project,
        debug: cli.debug,
    })?;
    if !config.enabled {
        return Ok(());
    }

    let _log_guard = logging::init_logging(&config);
    tracing::debug!(
        event = "command_start",
        command = ?cli.command,
        system_root = %config.system_root.display(),
        project_data_dir = %config.project_data_dir.display()
    );

    let ctx = Context::new(&config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = commands::run(cli.command, &ctx, &mut out);
    out.flush()?;
    if let Err(err) = &result {
        tracing::warn!(event = "command_failed", error = %format!("{err:#}"));
    }
    result
}
