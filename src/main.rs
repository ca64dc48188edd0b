use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};

use quest_tracker::quest::{load_lifecycles, load_quests};
use quest_tracker::{QuestConfig, QuestRegistry, QuestResult, ReplicationHub};

#[derive(Parser)]
#[command(
    name = "quest-tracker",
    about = "Quest progression tracker host",
    version
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "quest-tracker.toml")]
    config: PathBuf,

    /// Override the definition data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Read before tracing exists; the outcome is logged once it does
    let loaded = match QuestConfig::read(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    match config.log_filter.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("warning: ignoring log_filter '{}': {}", config.log_filter, e),
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    QuestConfig::log_source(&cli.config, found);

    if let Err(e) = run(config).await {
        error!("Quest tracker failed to start: {}", e);
        process::exit(1);
    }
}

async fn run(config: QuestConfig) -> QuestResult<()> {
    let quests = load_quests(&config.quests_path())?;
    let lifecycles = load_lifecycles(&config.lifecycles_path())?;

    let registry = Arc::new(QuestRegistry::with_unload_grace(config.unload_grace()));
    registry.init(quests, lifecycles).await?;

    let hub = ReplicationHub::attach(&registry, config.replication_buffer);
    let logger = registry.events().connect(|event| {
        match serde_json::to_string(event) {
            Ok(json) => debug!("{}: {}", event.name(), json),
            Err(_) => debug!("{}", event.name()),
        }
    });

    let scheduler = Arc::clone(&registry).spawn_scheduler(config.scheduler_interval());
    info!(
        "Quest tracker running with {} quests (scheduler every {:?}, replication buffer {})",
        registry.catalog().map_or(0, |catalog| catalog.len()),
        config.scheduler_interval(),
        config.replication_buffer
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    scheduler.abort();
    logger.disconnect();
    hub.detach();
    Ok(())
}
