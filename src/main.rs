use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use livelist::config::Config;

#[derive(Parser, Debug)]
#[command(name = "livelist")]
#[command(about = "Walk through cached, live-updating lists against an in-memory backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/livelist/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to a daily rotated file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  /// Number of records to seed the backend with
  #[arg(long)]
  seed: Option<usize>,

  /// Simulated backend latency in milliseconds
  #[arg(long)]
  latency_ms: Option<u64>,
}

/// Install the global subscriber. Verbosity follows `RUST_LOG`.
fn init_tracing(log_dir: Option<&Path>) -> Result<WorkerGuard> {
  let (writer, guard) = match log_dir {
    Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "livelist.log")),
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livelist=info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_writer(writer).with_target(true))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_dir.as_deref())?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(seed) = args.seed {
    config.demo.seed = seed;
  }
  if let Some(latency_ms) = args.latency_ms {
    config.demo.latency_ms = latency_ms;
  }

  livelist::demo::run(&config).await?;

  Ok(())
}
