use anyhow::{Context, Result};
use campusvault_service::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "campusvault")]
#[command(about = "Backup, retention and restore for the coaching-center database", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to campusvault.toml when present)
    #[arg(long, global = true, env = "CAMPUSVAULT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take a snapshot now, then apply retention
    CreateBackup {
        /// Keep the snapshot as a plain .db file
        #[arg(long)]
        no_compress: bool,
    },

    /// List snapshots in the backup directory, newest first
    ListBackups {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace the live database with a snapshot
    RestoreBackup {
        /// Snapshot file name; prompts for a choice when omitted
        #[arg(long)]
        snapshot: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Run scheduled backups until interrupted
    RunScheduler,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_failure_banner(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let scheduler_log = match cli.command {
        Commands::RunScheduler => Some(config.scheduler.log_file.as_path()),
        _ => None,
    };
    logging::init(&config.logging, scheduler_log)?;

    match cli.command {
        Commands::CreateBackup { no_compress } => commands::create::run(&config, no_compress).await,
        Commands::ListBackups { json } => commands::list::run(&config, json).await,
        Commands::RestoreBackup { snapshot, yes } => {
            commands::restore::run(&config, snapshot.as_deref(), yes).await
        }
        Commands::RunScheduler => commands::scheduler::run(&config).await,
    }
}

fn print_failure_banner(err: &anyhow::Error) {
    let rule = "=".repeat(60);
    eprintln!();
    eprintln!("{rule}");
    eprintln!("❌ FAILED: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("   caused by: {cause}");
    }
    eprintln!("{rule}");
}
