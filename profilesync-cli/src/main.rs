//! ProfileSync command line.
//!
//! Usage:
//!   profilesync audiences check audiences.txt
//!   profilesync audiences reconcile audiences.txt --state audiences.json
//!   profilesync sourcelog decode SourceLog.txt

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use profilesync_cli::{
    ProfileSyncConfig, ReconcileOptions, check_audiences, decode_source_log, encode_source_log, reconcile_audiences,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "profilesync")]
#[command(about = "ProfileSync audience and provenance tooling")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audience rule files
    #[command(subcommand)]
    Audiences(AudienceCommand),

    /// Stored source logs
    #[command(subcommand)]
    Sourcelog(SourceLogCommand),

    /// Validate the field registry named in the config
    Registry,
}

#[derive(Subcommand, Debug)]
enum AudienceCommand {
    /// Compile an audience file and report rule errors
    Check { file: PathBuf },

    /// Reconcile an audience file against a JSON audience state
    Reconcile {
        file: PathBuf,

        /// Live audience state (JSON), created when missing
        #[arg(long)]
        state: PathBuf,

        /// Also delete live audiences that no section of the file matches
        #[arg(long)]
        allow_deletion: bool,

        /// Include audiences derived from the field registry
        #[arg(long)]
        include_registry: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SourceLogCommand {
    /// Print a stored source log as JSON
    Decode { file: PathBuf },

    /// Print the stored form of a JSON source log
    Encode { file: PathBuf },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = ProfileSyncConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Audiences(AudienceCommand::Check { file }) => {
            let report = check_audiences(&file)?;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} audience(s) failed to compile", report.errors.len());
            }
        }
        Command::Audiences(AudienceCommand::Reconcile {
            file,
            state,
            allow_deletion,
            include_registry,
        }) => {
            let options = ReconcileOptions {
                state,
                allow_deletion,
                include_registry,
            };
            let outcome = reconcile_audiences(&file, &options, &config).await?;
            print_json(&outcome)?;
            if !outcome.compile_errors.is_empty() {
                bail!("{} audience(s) failed to compile and were skipped", outcome.compile_errors.len());
            }
        }
        Command::Sourcelog(SourceLogCommand::Decode { file }) => {
            print_json(&decode_source_log(&file)?)?;
        }
        Command::Sourcelog(SourceLogCommand::Encode { file }) => {
            println!("{}", encode_source_log(&file)?);
        }
        Command::Registry => {
            let Some(registry) = config.load_registry()? else {
                bail!("no registry configured; set `registry` in the config file");
            };
            info!(
                profile_type = registry.profile_type(),
                fields = registry.len(),
                "registry is valid"
            );
        }
    }
    Ok(())
}
