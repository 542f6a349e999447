use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod gallery;
mod store;

use config::Config;
use dbus_interface::AttendanceService;
use gallery::DiskFetcher;
use rollcall_core::FacePipeline;
use rollcall_hw::Camera;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::from_env();

    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;
    let roster = store.load_roster().context("failed to load roster")?;
    tracing::info!(people = roster.len(), "roster loaded");

    let mut pipeline = FacePipeline::load(
        &config.detector_model_path(),
        &config.encoder_model_path(),
    )
    .context("failed to load face models")?;

    // Build the whole gallery before the capture loop exists: the loop
    // never matches against a partially built gallery.
    let fetched = gallery::fetch_stills(&roster, Arc::new(DiskFetcher)).await;
    let session_gallery = gallery::assemble_gallery(&fetched, &mut pipeline);
    if session_gallery.is_empty() {
        tracing::warn!(
            "no person could be enrolled; every face this session will match as unknown"
        );
    } else {
        tracing::info!(enrolled = session_gallery.len(), "session gallery built");
    }

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;

    let session = engine::spawn_session(camera, pipeline, session_gallery, store, &config)
        .context("failed to start attendance session")?;

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at(
            "/org/rollcall/Attendance1",
            AttendanceService::new(session.clone(), roster),
        )?
        .build()
        .await
        .context("failed to register D-Bus service")?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    if let Err(e) = session.stop().await {
        tracing::debug!(error = %e, "session already ended");
    }

    Ok(())
}
