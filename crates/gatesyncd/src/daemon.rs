//! Assembles the subsystems and runs them until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use gatesync_api::{ApiState, build_router};
use gatesync_bundle::{BundleCache, UriFetcher};
use gatesync_ingest::{Ingestor, Provisioner, Snapshot, SyncEvent};
use gatesync_notify::NotificationHub;
use gatesync_report::{HttpStatusSink, StatusReporter};
use gatesync_state::StateStore;

use crate::config::DaemonConfig;
use crate::feed;

const EVENT_QUEUE: usize = 16;

pub async fn run(config: DaemonConfig, events: Option<PathBuf>) -> anyhow::Result<()> {
    info!("gatesync daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.store.data_dir.join("gatesync.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let hub = NotificationHub::new(config.debounce());

    let cache = BundleCache::create(&config.bundles.dir).await?;
    let fetcher = Arc::new(UriFetcher::new(config.fetch_timeout())?);
    let provisioner = Provisioner::new(store.clone(), fetcher, cache, config.provision());

    let reporter = match &config.upstream.status_url {
        Some(url) => {
            let sink = HttpStatusSink::new(url.clone(), config.upstream_timeout())?;
            info!(%url, "upstream status reporting enabled");
            Some(StatusReporter::new(store.clone(), Arc::new(sink)))
        }
        None => {
            warn!("no upstream status_url configured; outcomes stay local");
            None
        }
    };

    let mut ingestor = Ingestor::new(store.clone(), hub.clone(), provisioner, config.ingest());
    let mut api_state = ApiState::new(store.clone(), hub.clone(), config.api());
    if let Some(reporter) = reporter {
        ingestor = ingestor.with_reporter(reporter.clone());
        api_state = api_state.with_reporter(reporter);
    }

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

    let ingest_handle = tokio::spawn(ingestor.run(event_rx, shutdown_rx));

    // Startup replay: re-derive state from whatever the store already holds.
    event_tx
        .send(SyncEvent::Snapshot(Snapshot {
            snapshot_info: "startup".to_string(),
            tables: Vec::new(),
        }))
        .await?;

    let feed_handle = events.map(|source| {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = feed::forward_source(&source, tx).await {
                error!(source = %source.display(), error = %e, "event feed failed");
            }
        })
    });

    // ── API server ─────────────────────────────────────────────

    let router = build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for CTRL+C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Clean up.
    if let Some(handle) = feed_handle {
        handle.abort();
    }
    drop(event_tx);
    let _ = ingest_handle.await;

    info!("gatesync daemon stopped");
    Ok(())
}
