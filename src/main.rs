//! core-registry entry point.
//!
//! Registers the configured cores, runs the close workers and drains the
//! registry on Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use core_registry::config::{LogFormat, RegistryConfig};
use core_registry::directory::DirectoryLoader;
use core_registry::domain::{CoreDescriptor, CoreLoader, CoreRegistry, EventBus, StateNotifier};
use core_registry::persistence::PersistenceBackend;
use core_registry::service::CoreService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RegistryConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
    tracing::info!(root = %config.core_root.display(), "starting core-registry");

    // Build domain layer
    let event_bus = EventBus::new(config.event_bus_capacity);
    let registry = Arc::new(CoreRegistry::new(
        config.transient_cache_size,
        event_bus.clone(),
    ));
    if !registry.has_bounded_transient_cache() {
        tracing::warn!("transient cache is unbounded; set TRANSIENT_CACHE_SIZE to cap it");
    }

    // Build persistence and service layers
    let persistence = PersistenceBackend::from_config(&config)
        .await
        .context("failed to initialize snapshot persistence")?;
    let loader: Arc<dyn CoreLoader> = Arc::new(DirectoryLoader::new(config.core_root.clone()));
    let notifier: Arc<dyn StateNotifier> = Arc::new(event_bus.clone());
    let service = CoreService::new(registry, loader, event_bus, persistence.clone())
        .with_notifier(notifier);
    service.spawn_close_workers(config.close_workers);

    // Register cores
    let descriptors = match &config.cores_file {
        Some(path) => read_cores_file(path, &config.core_root)?,
        None => persistence
            .load_latest()
            .await
            .context("failed to read the latest snapshot")?
            .map(|snapshot| snapshot.descriptors())
            .unwrap_or_default(),
    };
    tracing::info!(descriptors = descriptors.len(), "registering cores");
    service.load_on_startup(descriptors).await;
    let resident: Vec<String> = service
        .registry()
        .cores()
        .iter()
        .map(|core| core.name())
        .collect();
    tracing::info!(cores = ?resident, "permanent cores resident");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("ctrl-c received, shutting down");

    let report = service.shutdown().await;
    if report.failed > 0 {
        tracing::warn!(failed = report.failed, "some cores did not close cleanly");
    }
    Ok(())
}

/// Reads a JSON array of descriptors and resolves their directories against
/// `root`.
fn read_cores_file(path: &Path, root: &Path) -> anyhow::Result<Vec<CoreDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cores file {}", path.display()))?;
    let descriptors: Vec<CoreDescriptor> = serde_json::from_str(&raw)
        .with_context(|| format!("cores file {} is not a descriptor list", path.display()))?;
    Ok(descriptors
        .into_iter()
        .map(|d| d.resolved_against(root))
        .collect())
}
