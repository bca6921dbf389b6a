//! Watchlink - delegated file watching over a relay connection
//!
//! Debug CLI for the relay client: registers watches against a remote
//! watcher service and prints every change notification it delivers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watchlink_client::{
    DirectoryWatchSink, FileEventKind, FileWatchSink, IdentityCanonicalizer, RelayConfig,
    WatchRelay, WatchToken,
};

/// Watchlink - watch-subscription relay client
#[derive(Parser)]
#[command(name = "watchlink")]
#[command(about = "Tap a remote watcher service for change notifications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch paths through a remote watcher service and print events
    Tap(TapArgs),
    /// Generate a default configuration file
    Config(ConfigArgs),
}

#[derive(Args)]
struct TapArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override remote watcher host
    #[arg(long)]
    host: Option<String>,

    /// Override remote watcher port
    #[arg(short, long)]
    port: Option<u16>,

    /// Watch paths as directories instead of files
    #[arg(short, long)]
    dir: bool,

    /// Watch directories recursively (implies --dir)
    #[arg(short, long)]
    recursive: bool,

    /// Seconds between reconnect attempts
    #[arg(long, default_value = "5")]
    retry_secs: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Paths to watch
    #[arg(required = true)]
    paths: Vec<String>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Output file for the generated config
    #[arg(short, long, default_value = "watchlink.toml")]
    output: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tap(args) => run_tap(args).await,
        Commands::Config(args) => generate_config(args).await,
    }
}

/// Sink that prints every delivered event to stdout
struct PrintSink;

impl FileWatchSink for PrintSink {
    fn file_changed(&self, path: &str, kind: FileEventKind) {
        println!("{kind:?}\t{path}");
    }
}

impl DirectoryWatchSink for PrintSink {
    fn directory_changed(&self, path: &str) {
        println!("Changed\t{path}");
    }
}

/// Register the requested watches and print notifications until Ctrl+C
async fn run_tap(args: TapArgs) -> Result<()> {
    init_tracing(args.debug)?;

    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_file(path)
            .await
            .with_context(|| "Failed to load configuration")?,
        None => RelayConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    let relay = WatchRelay::new(IdentityCanonicalizer);
    let sink = Arc::new(PrintSink);
    let dir_sink: Arc<dyn DirectoryWatchSink> = sink.clone();
    let file_sink: Arc<dyn FileWatchSink> = sink.clone();

    let mut tokens: Vec<WatchToken> = Vec::new();
    for path in &args.paths {
        let token = if args.dir || args.recursive {
            relay.watch_directory(path, Arc::clone(&dir_sink), args.recursive)
        } else {
            relay.watch_file(path, Arc::clone(&file_sink))
        };
        info!(path = %path, id = %token.id(), "registered watch");
        tokens.push(token);
    }

    // Reconnection policy belongs to the caller; the relay itself only
    // queues requests while the connection is down.
    let mut retry = tokio::time::interval(Duration::from_secs(args.retry_secs.max(1)));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = retry.tick() => {
                if !relay.is_connected() {
                    match relay.configuration_changed(config.clone()).await {
                        Ok(()) => info!(addr = %config.addr(), "watching"),
                        Err(err) => warn!(error = %err, "connect failed, will retry"),
                    }
                }
            }
        }
    }

    for token in &tokens {
        token.close();
    }

    let stats = relay.stats();
    info!(
        requests_sent = stats.requests_sent,
        notifications = stats.notifications_dispatched,
        "shutting down"
    );
    Ok(())
}

/// Generate a default configuration file
async fn generate_config(args: ConfigArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        anyhow::bail!(
            "configuration file already exists: {}",
            args.output.display()
        );
    }

    RelayConfig::default()
        .save_to_file(&args.output)
        .await
        .with_context(|| "Failed to write configuration")?;

    println!("Generated configuration file: {}", args.output.display());
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
