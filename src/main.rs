//! Relaybot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "A webhook-driven chat relay with bounded conversation memory")]
struct Cli {
    /// Bind address override (otherwise RELAYBOT_BIND or 0.0.0.0:3000)
    #[arg(short, long)]
    bind: Option<std::net::SocketAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config =
        relaybot::config::Config::load().with_context(|| "failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let db = relaybot::db::Db::connect(&config.sqlite_path())
        .await
        .with_context(|| "failed to open database")?;

    let store =
        relaybot::conversation::ConversationStore::new(db.pool.clone(), config.conversation);
    let resolver = relaybot::conversation::ConversationResolver::new(store.clone());
    let health = Arc::new(relaybot::health::HealthTracker::new());
    let dedup = Arc::new(relaybot::health::DedupGuard::new(config.cleanup.dedup_ceiling));
    let platform: Arc<dyn relaybot::platform::Platform> =
        Arc::new(relaybot::platform::RestPlatform::new(&config.platform)?);
    let responder: Arc<dyn relaybot::llm::Responder> =
        Arc::new(relaybot::llm::RestResponder::new(&config.llm)?);
    let prompts = Arc::new(relaybot::prompts::PromptBuilder::new(config.profile.clone())?);

    let deps = relaybot::relay::RelayDeps {
        store: store.clone(),
        resolver,
        health,
        dedup: dedup.clone(),
        platform,
        responder,
        prompts,
        bot_email: config.platform.bot_email.clone(),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweep = relaybot::cleanup::spawn_retention_sweep(
        store,
        dedup,
        config.cleanup,
        shutdown_rx.clone(),
    );

    let state = Arc::new(relaybot::api::ApiState {
        deps,
        started_at: std::time::Instant::now(),
    });
    let server = relaybot::api::start_http_server(config.bind, state, shutdown_rx)
        .await
        .with_context(|| "failed to start HTTP server")?;

    tracing::info!("relaybot started");

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = server.await;
    sweep.abort();
    db.close().await;

    tracing::info!("relaybot stopped");
    Ok(())
}
