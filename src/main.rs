//! telemetry-sync - live vehicle telemetry for dashboards

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telemetry_sync::{
    config::{Args, LogFormat},
    services::{
        spawn_push_reader, ApiClient, HttpApiClient, HttpApiConfig, NoopPushClient, PushClient,
        StdioPushBridge,
    },
    sync::{spawn_poll_task, ScanOutcome, SyncEngine},
    telemetry::{CatalogStore, FileCatalogStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr; stdout carries push subscriptions
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("telemetry_sync={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  telemetry-sync");
    info!("======================================");
    info!("Backend: {}", args.api_base_url);
    info!("Data dir: {}", args.data_dir.display());
    info!("Poll interval: {}s", args.poll_interval_secs);
    info!("Push: {}", if args.push_stdin { "stdin/stdout" } else { "disabled" });
    info!("Deep scan: {}", if args.deep_scan { "on startup" } else { "off" });
    info!("======================================");

    let api: Arc<dyn ApiClient> = Arc::new(HttpApiClient::new(HttpApiConfig::from_args(&args))?);
    let store: Arc<dyn CatalogStore> = Arc::new(FileCatalogStore::new(args.data_dir.clone())?);
    let push: Arc<dyn PushClient> = if args.push_stdin {
        Arc::new(StdioPushBridge::new(tokio::io::stdout()))
    } else {
        Arc::new(NoopPushClient)
    };

    let engine = SyncEngine::new(api, push, store, args.sync_config());

    // Log every visible state change
    let mut updates = engine.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            info!(
                vin = state.vin.as_deref().unwrap_or("-"),
                signals = state.signals.len(),
                last_updated = state.last_updated,
                refreshing = state.is_refreshing,
                scanning = state.is_scanning,
                enriching = state.is_enriching,
                "Vehicle state changed"
            );
        }
    });

    if let Err(e) = engine.fetch_user().await {
        warn!("Failed to load user profile: {}", e);
    }

    let active = match engine.fetch_vehicles().await {
        Ok(Some(vin)) => {
            info!("Active vehicle: {}", vin);
            Some(vin)
        }
        Ok(None) => {
            warn!("No vehicles on this account");
            None
        }
        Err(e) => {
            error!("Failed to load vehicles: {}", e);
            std::process::exit(1);
        }
    };

    let push_reader = args.push_stdin.then(|| spawn_push_reader(Arc::clone(&engine)));

    if let (true, Some(vin)) = (args.deep_scan, active.as_deref()) {
        match engine.fetch_full_telemetry(vin, false).await {
            ScanOutcome::Completed { samples } => info!("Deep scan found {} resources", samples),
            ScanOutcome::Cached => info!("Deep scan skipped, snapshot is recent"),
            ScanOutcome::NoSamples => warn!("Deep scan received no samples yet"),
            ScanOutcome::Failed(e) => warn!("Deep scan failed: {}", e),
        }
    }

    let poller = spawn_poll_task(Arc::clone(&engine));

    info!(session = %engine.session_id(), "Running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    poller.abort();
    watcher.abort();
    if let Some(reader) = push_reader {
        reader.abort();
    }
    Ok(())
}
