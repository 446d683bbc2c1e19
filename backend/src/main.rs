//! Library intake service
//!
//! Watches the configured folders and runs every settled video file through
//! the intake pipeline until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use library_intake::config::Config;
use library_intake::db::{Database, FolderType};
use library_intake::jobs;
use library_intake::services::{
    FfprobeAnalyzer, MetadataProvider, Pipeline, TmdbClient, TvdbClient, WatchFolderSource, WatcherConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "library_intake=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting library intake");

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let db = Database::connect_with_retry(&config.database_path, 5, Duration::from_secs(2)).await?;
    db.migrate().await.context("Failed to run database migrations")?;

    // WATCH_PATHS joins the watch folders already in the catalog
    for path in &config.watch_paths {
        db.scan_folders()
            .upsert(&path.to_string_lossy(), FolderType::Watch)
            .await
            .with_context(|| format!("Failed to register watch folder {}", path.display()))?;
    }
    let watch_roots: Vec<PathBuf> = db
        .scan_folders()
        .list_by_type(FolderType::Watch)
        .await?
        .into_iter()
        .filter(|f| f.enabled)
        .map(|f| PathBuf::from(f.path))
        .collect();
    if watch_roots.is_empty() {
        tracing::warn!("No watch folders configured; set WATCH_PATHS");
    }

    tokio::fs::create_dir_all(&config.issues_path)
        .await
        .with_context(|| format!("Failed to create issues folder {}", config.issues_path.display()))?;

    let providers: Vec<Arc<dyn MetadataProvider>> = vec![
        Arc::new(TmdbClient::new(config.tmdb_api_key.clone().unwrap_or_default())?),
        Arc::new(TvdbClient::new(config.tvdb_api_key.clone().unwrap_or_default())?),
    ];
    for provider in &providers {
        if !provider.has_credentials() {
            tracing::warn!(provider = provider.name(), "No API key configured, auto-import disabled for provider");
        }
    }

    let probe = FfprobeAnalyzer::new(&config.ffprobe_path, config.probe_timeout);
    if !probe.is_available().await {
        tracing::warn!(
            ffprobe = %config.ffprobe_path,
            "ffprobe not available; duplicates will be filed as unverified"
        );
    }

    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        Arc::new(probe),
        providers,
        config.issues_path.clone(),
    ));

    let mut scheduler = jobs::start_scheduler(db.clone(), config.issues_path.clone()).await?;

    let watcher = WatchFolderSource::start(
        pipeline,
        watch_roots,
        WatcherConfig {
            settle_delay: config.settle_delay,
            queue_capacity: config.queue_capacity,
            exclude: vec![config.issues_path.clone()],
            ..Default::default()
        },
    )
    .await?;
    tracing::info!(folders = watcher.roots().len(), "Intake running");

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    watcher.shutdown();
    scheduler.shutdown().await?;
    Ok(())
}
