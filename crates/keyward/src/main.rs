#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use tracing_subscriber::prelude::*;

mod audit;
mod config;
mod directory;
mod doctor;
mod envelope;
mod errors;
mod fsutil;
mod kms;
mod mfa;
mod orchestrator;
mod params;
mod paths;
mod registry;
mod server;
mod session;
mod signer;
mod store;

#[derive(Parser, Debug)]
#[command(name = "keyward", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signing gateway over stdio (JSON-lines frames).
    Serve,

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &paths::GatewayPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("keyward.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::GatewayPaths::discover()?;

    match cli.cmd {
        Command::Serve => {
            std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
            let _log_guard = init_logging(&paths);
            let config = store::ConfigStore::new(&paths)
                .load_or_init_default()
                .context("load config")?;
            server::run(&paths, config).await.context("serve failed")
        }
        Command::Paths => {
            use std::io::Write as _;
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
              "audit_file": paths.audit_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
        Command::Doctor { json } => doctor::run(json).context("doctor failed"),
    }
}
