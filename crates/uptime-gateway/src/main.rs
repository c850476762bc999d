use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use uptime_core::{config::TriggerStrategy, UptimeConfig};
use uptime_probe::HttpProbe;
use uptime_scheduler::{
    handler::PURGE_HISTORY, CronHandlers, DeferredCallTrigger, Invocation, Pacemaker,
    PurgeHistory, SchedulerEngine, SelfTrigger, StoreTrigger,
};
use uptime_store::{SqliteHistory, SqliteStore};

mod app;
mod http;

/// Uptime gateway: HTTP ingress for the self-rescheduling ping orchestrator.
#[derive(Parser)]
#[command(name = "uptime-gateway", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "UPTIME_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "uptime_gateway=info,uptime_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config / UPTIME_CONFIG > ~/.uptime/uptime.toml
    let config = UptimeConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        UptimeConfig::default()
    });

    // one SQLite file; the coordination store and history each get a connection
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteStore::new(open_db(db_path)?)?);
    let history = Arc::new(SqliteHistory::new(
        open_db(db_path)?,
        config.history.retention(),
    )?);

    let probe = Arc::new(HttpProbe::new(
        config.scheduler.job_timeout(),
        &config.probe.user_agent,
    )?);

    let store_trigger = Arc::new(StoreTrigger::new(store.clone()));
    let trigger: Arc<dyn SelfTrigger> = match config.trigger.strategy {
        TriggerStrategy::Store => store_trigger.clone(),
        TriggerStrategy::Deferred => {
            let url = config.callback_url();
            info!(%url, "deferred self-trigger");
            Arc::new(DeferredCallTrigger::new(reqwest::Client::new(), url))
        }
    };

    let handlers = CronHandlers::new().register(
        PURGE_HISTORY,
        Arc::new(PurgeHistory::new(history.clone(), config.history.retention())),
    );
    let engine = Arc::new(
        SchedulerEngine::new(
            store,
            history,
            probe,
            trigger,
            config.scheduler.clone(),
        )?
        .with_cron_handlers(handlers),
    );

    let pacemaker = match config.trigger.strategy {
        TriggerStrategy::Store => Some(Pacemaker::new(
            engine.clone(),
            store_trigger,
            Duration::from_secs(config.trigger.poll_interval_secs.max(1)),
        )),
        TriggerStrategy::Deferred => None,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if let Some(pm) = pacemaker.clone() {
        tokio::spawn(async move { pm.run(shutdown_rx).await });
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let start_on_boot = config.trigger.start_on_boot;
    let state = Arc::new(app::AppState::new(config, engine.clone(), pacemaker));
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Uptime gateway listening on {}", addr);

    if start_on_boot {
        tokio::spawn(async move {
            match engine.trigger(Invocation::Fresh).await {
                Ok(outcome) => info!(?outcome, "boot cycle finished"),
                Err(e) => warn!("boot cycle failed: {e}"),
            }
        });
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal pacemaker to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), "could not create data directory: {e}");
        }
    }
}
