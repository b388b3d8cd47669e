mod config;
mod dispatch;
mod events;
mod ingest;
mod monitor;
mod mqtt;
mod registry;
mod state;
mod web;

use anyhow::Result;
use std::{env, sync::Arc, time::Instant};
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dispatch::CommandDispatcher;
use ingest::TelemetryIngestor;
use monitor::StalenessMonitor;
use mqtt::{BrokerLink, LinkStatus};
use state::ZoneStateStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let registry = cfg.registry();
    if registry.is_empty() {
        anyhow::bail!("no zones configured in {config_path}");
    }

    info!(
        zones = registry.len(),
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        stale_threshold_secs = cfg.monitor.stale_threshold_secs,
        "config loaded from {config_path}"
    );

    // ── Core ────────────────────────────────────────────────────────
    let store = ZoneStateStore::new(&registry, cfg.monitor.stale_threshold());
    let events = events::channel();
    let reevaluate = Arc::new(Notify::new());
    let link = LinkStatus::default();

    // ── MQTT (ingestion context) ────────────────────────────────────
    let (client, eventloop) = mqtt::client(&cfg.mqtt);
    let ingestor = TelemetryIngestor::new(store.clone(), events.clone(), Arc::clone(&reevaluate));
    let broker = BrokerLink::new(client.clone(), cfg.topics.sensor.clone(), ingestor, link.clone());
    tokio::spawn(broker.run(eventloop));

    // ── Staleness monitor (periodic context) ────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = StalenessMonitor::new(store.clone(), events.clone());
    let monitor_task = tokio::spawn(monitor.run(
        cfg.monitor.tick_interval(),
        Arc::clone(&reevaluate),
        shutdown_rx,
    ));

    // ── Web API ─────────────────────────────────────────────────────
    let dispatcher = CommandDispatcher::new(
        client,
        cfg.topics.relay.clone(),
        cfg.topics.config_prefix.clone(),
    );
    let web_state = web::AppState {
        store,
        dispatcher,
        events,
        link,
        stale_threshold_secs: cfg.monitor.stale_threshold_secs,
        started_at: Instant::now(),
    };
    let web_port = cfg.web.port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port).await {
            error!("web server error: {e:#}");
        }
    });

    // ── Shutdown ────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        warn!("staleness monitor ended abnormally: {e}");
    }

    Ok(())
}
