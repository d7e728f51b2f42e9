//! dashdeps CLI - inspect property paths and run dashboard fixtures.

mod fixture;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dashdeps_core::PropertyPath;
use dashdeps_execution::{DashboardExecution, EngineConfig};
use fixture::Fixture;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dashdeps")]
#[command(about = "Runtime dependency resolution for dashboard trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a property path and print its parts
    Parse {
        /// Path, e.g. `with.stuff1.rows[0].a`
        path: String,
    },
    /// Run a dashboard fixture
    Run {
        /// Fixture file
        fixture: PathBuf,
        /// Max leaves executing at once
        #[arg(long)]
        max_parallel: Option<NonZeroUsize>,
        /// Seconds a node may wait for its dependencies (0 disables)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "dashdeps=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { path } => {
            let parsed = PropertyPath::parse(&path)?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Commands::Run {
            fixture,
            max_parallel,
            timeout_secs,
        } => {
            let fixture = Fixture::load(&fixture)?;

            let mut config = EngineConfig::from_env();
            if let Some(max) = max_parallel {
                config = config.with_max_parallel(max);
            }
            if let Some(secs) = timeout_secs {
                config = config.with_dependency_timeout((secs > 0).then(|| Duration::from_secs(secs)));
            }

            let execution = DashboardExecution::new(fixture.build_tree()?, Arc::new(fixture.executor()))
                .with_config(config);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling execution");
                    on_signal.cancel();
                }
            });

            let report = execution
                .run(fixture.execution_inputs(), cancel)
                .await
                .context("execution failed")?;
            info!("Completed execution {}", report.execution_id);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
