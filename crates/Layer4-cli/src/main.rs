//! Agentbox CLI - Main entry point

mod cli;
mod render;

use agentbox_foundation::{AgentboxConfig, ConfigLoader};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Agentbox - run coding agent tasks in disposable containers
#[derive(Parser, Debug)]
#[command(name = "agentbox")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file applied on top of the user and project configs
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one instruction end-to-end and stream its events
    Run {
        /// What the agent should do
        instruction: String,

        /// Owner the task is admitted under
        #[arg(short, long, default_value = "local")]
        owner: String,

        /// Approve every permission prompt once instead of asking
        #[arg(long)]
        auto_approve: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let loader = config_loader(args.config.as_deref())?;

    match args.command {
        Command::Run {
            instruction,
            owner,
            auto_approve,
            json,
        } => {
            let config = loader.load()?;
            let options = cli::RunOptions {
                instruction,
                owner,
                auto_approve,
                json,
            };

            let task = cli::run_task(&config, options).await?;
            if task.status == agentbox_task::TaskStatus::Completed {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Config => {
            print_config(&loader)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn config_loader(explicit: Option<&std::path::Path>) -> anyhow::Result<ConfigLoader> {
    let working_dir = std::env::current_dir()?;
    let loader = ConfigLoader::new(&working_dir);

    Ok(match explicit {
        Some(path) => loader.with_file(path),
        None => loader,
    })
}

fn print_config(loader: &ConfigLoader) -> anyhow::Result<()> {
    let config: AgentboxConfig = loader.load()?;

    let files = loader.existing_files();
    if files.is_empty() {
        println!("# No config files found, showing defaults");
    }
    for file in files {
        println!("# Loaded from {}", file.display());
    }
    println!();
    print!("{}", config.to_toml_string()?);

    Ok(())
}
