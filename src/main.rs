use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use signal_tracker::config::Config;
use signal_tracker::feed::HttpFeed;
use signal_tracker::tracking::{EventBus, FileStore, LiveBroadcaster, LogObserver, TrackerDaemon, TradeStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let http = Arc::new(HttpFeed::new(&cfg)?);
    let store = Arc::new(
        TradeStore::new(Arc::new(FileStore::from_config(&cfg.store)), cfg.store.clone())
            .with_event_cap(cfg.lifecycle.max_events_per_trade),
    );
    info!("Track records in {}", cfg.store.data_dir.display());

    let mut bus = EventBus::new();
    bus.subscribe(Arc::new(LogObserver));

    let (mut daemon, handle) = TrackerDaemon::new(&cfg, store.clone(), http.clone(), http.clone(), bus);

    let broadcaster = Arc::new(
        LiveBroadcaster::new(cfg.broadcast.clone(), store.clone(), http).with_daemon(handle.clone()),
    );
    let live_tasks = broadcaster.start();

    let mut daemon_task = tokio::spawn(async move { daemon.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            handle.stop();
            match daemon_task.await {
                Ok(Err(e)) => error!("Tracker exited with error: {}", e),
                Err(e) => error!("Tracker task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        res = &mut daemon_task => {
            match res {
                Ok(Err(e)) => error!("Tracker exited with error: {}", e),
                Err(e) => error!("Tracker task panicked: {}", e),
                Ok(Ok(())) => info!("Tracker exited"),
            }
        }
    }

    broadcaster.stop();
    for task in live_tasks {
        let _ = task.await;
    }

    Ok(())
}
