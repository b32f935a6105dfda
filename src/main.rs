//! upstream-sync
//!
//! Keeps a reverse proxy's upstream blocks in line with the backend
//! registrations published to a shared object store.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────┐   fetch (If-None-Match)   ┌──────────────┐
//!   │   registry   │──────────────────────────▶│   upstream   │
//!   │ http/fs/mem  │   one blob per app        │ parse+render │
//!   └──────▲───────┘                           └──────┬───────┘
//!          │ register / deregister                    │ EffectiveConfiguration
//!          │ (conditional put)                        ▼
//!   ┌──────┴───────┐                           ┌──────────────┐
//!   │ backend node │                           │  reconcile   │── NoOp ──▶ done
//!   └──────────────┘                           └──────┬───────┘
//!                                                     │ Apply
//!                                                     ▼
//!                                              ┌──────────────┐
//!                                              │ atomic write │── fail ──▶ exit 1
//!                                              │   + reload   │
//!                                              └──────────────┘
//! ```
//!
//! Each invocation runs one pass; scheduling is left to cron or a systemd timer.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use upstream_sync::config::{load_config, SyncConfig};
use upstream_sync::observability::{logging, metrics::TextfileExporter};
use upstream_sync::registry::publisher::{self, PublishOutcome};
use upstream_sync::registry::ConfiguredStore;
use upstream_sync::sync::{CommandReloader, SyncEngine};
use upstream_sync::upstream::{Application, BackendEndpoint};

#[derive(Parser)]
#[command(name = "upstream-sync", version)]
#[command(about = "Synchronize proxy upstreams with a shared backend registry", long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/etc/upstream-sync/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass
    Sync {
        /// Render and compare without writing or reloading
        #[arg(long)]
        dry_run: bool,
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the configuration the registries currently produce
    Render,
    /// Publish this node's address for an application
    Register(EndpointArgs),
    /// Withdraw this node's address for an application
    Deregister(EndpointArgs),
    /// Load and validate the configuration file
    CheckConfig,
}

#[derive(Args)]
struct EndpointArgs {
    /// Application name as listed in the configuration
    #[arg(short, long)]
    application: String,
    #[arg(long)]
    host: String,
    #[arg(long)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    logging::init(&config.observability);

    let exporter = config
        .observability
        .metrics_textfile
        .as_ref()
        .and_then(|path| match TextfileExporter::install(path) {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics exporter unavailable");
                None
            }
        });

    let code = match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    };

    if let Some(exporter) = exporter {
        if let Err(e) = exporter.flush() {
            tracing::warn!(error = %e, "Failed to write metrics textfile");
        }
    }

    code
}

async fn run(command: Commands, config: &SyncConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::CheckConfig => {
            println!(
                "Configuration OK: {} application(s), bucket {}",
                config.applications.len(),
                config.registry.bucket
            );
        }
        Commands::Sync { dry_run, json } => {
            let engine = build_engine(config)?.dry_run(dry_run);
            tracing::debug!(engine = ?engine, "Starting pass");

            let report = engine.run_pass().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
        }
        Commands::Render => {
            let engine = build_engine(config)?.dry_run(true);
            let candidate = engine.candidate().await?;
            for (application, error) in candidate
                .applications
                .iter()
                .filter_map(|a| a.status.error().map(|e| (&a.application, e)))
            {
                eprintln!("warning: {}: {}", application, error);
            }
            println!("{}", candidate.configuration);
        }
        Commands::Register(args) => {
            let (store, key, endpoint) = publish_target(config, args)?;
            let outcome = publisher::register(&store, &config.registry.bucket, &key, endpoint).await?;
            print_outcome(outcome);
        }
        Commands::Deregister(args) => {
            let (store, key, endpoint) = publish_target(config, args)?;
            let outcome = publisher::deregister(&store, &config.registry.bucket, &key, &endpoint).await?;
            print_outcome(outcome);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_engine(
    config: &SyncConfig,
) -> Result<SyncEngine<ConfiguredStore, CommandReloader>, Box<dyn std::error::Error>> {
    let store = ConfiguredStore::from_config(&config.registry)?;
    let reloader = CommandReloader::from_config(&config.reload);
    Ok(SyncEngine::from_config(config, store, reloader))
}

fn publish_target(
    config: &SyncConfig,
    args: EndpointArgs,
) -> Result<(ConfiguredStore, String, BackendEndpoint), Box<dyn std::error::Error>> {
    let application = config
        .applications
        .iter()
        .map(Application::from)
        .find(|a| a.name == args.application)
        .ok_or_else(|| format!("unknown application {:?}", args.application))?;

    if args.port == 0 {
        return Err("port must be positive".into());
    }
    let host = BackendEndpoint::canonical_host(&args.host)
        .map_err(|reason| format!("invalid host {:?}: {}", args.host, reason))?;

    let store = ConfiguredStore::from_config(&config.registry)?;
    Ok((store, application.key, BackendEndpoint::new(host, args.port)))
}

fn print_outcome(outcome: PublishOutcome) {
    let message = match outcome {
        PublishOutcome::Added => "Registered",
        PublishOutcome::AlreadyPresent => "Already registered, nothing to do",
        PublishOutcome::Removed => "Deregistered",
        PublishOutcome::NotPresent => "Not registered, nothing to do",
    };
    println!("{}", message);
}
