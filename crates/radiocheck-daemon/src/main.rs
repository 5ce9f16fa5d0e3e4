use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use radiocheck_proto::config::Config;
use radiocheck_proto::normalize::{ArtistAliases, Normalizer};
use radiocheck_proto::poll::{PollOrchestrator, PollSettings};
use radiocheck_proto::sources::build_adapters;
use radiocheck_proto::state::SnapshotManager;
use radiocheck_proto::store::{seed_stations, MatchSink, SqliteStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const DEFAULT_FILTER: &str = "info,radiocheck_proto=debug,hyper_util=warn,reqwest=warn";

#[derive(Parser)]
#[command(name = "radiocheck", version, about = "Watch Dutch radio now-playing pages for target tracks")]
struct Cli {
    /// Config file (defaults to ~/.config/radiocheck/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single poll cycle, print its report and exit
    #[arg(long)]
    once: bool,

    /// Seconds between poll cycles, overriding the config file
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // File gets everything the filter lets through, the console only info and up.
    let data_dir = radiocheck_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("radiocheck.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);
    if let Some(secs) = cli.interval {
        config.poll.interval_secs = secs;
    }

    let store = Arc::new(
        SqliteStore::open(&config.daemon.db_path)
            .with_context(|| format!("opening {}", config.daemon.db_path.display()))?,
    );
    match seed_stations(&store, &config.stations.stations_toml) {
        Ok(0) => {}
        Ok(n) => info!("[store] {} stations added from station file", n),
        Err(e) => warn!("[store] station file not loaded: {:#}", e),
    }

    let normalizer = Normalizer::new(
        config.matching.title_case,
        ArtistAliases::new(&config.matching.artist_aliases),
    );
    let sink: Arc<dyn MatchSink> = store.clone();
    let mut orchestrator =
        PollOrchestrator::new(sink, PollSettings::from_config(&config), normalizer)
            .with_snapshot(SnapshotManager::new(Some(config.daemon.snapshot_file.clone())));
    for adapter in build_adapters(&config)? {
        orchestrator = orchestrator.with_adapter(adapter);
    }

    if cli.once {
        let report = orchestrator.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let cancel = CancellationToken::new();
        tokio::spawn(shutdown_on_signal(cancel.clone()));
        orchestrator.run(cancel).await;
    }

    // Last references to the store; the connection closes here.
    drop(orchestrator);
    drop(store);
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
    cancel.cancel();
}
