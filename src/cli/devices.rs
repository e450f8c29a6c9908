//! Device pool command handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use fleetshare::config::Config;
use fleetshare::devices::{DeviceCache, InMemoryReservations, SimulatedRegistrar};
use fleetshare::store::{DocumentPersister, JsonFileDocumentStore, RetryPolicy};

/// Build the device cache against the on-disk roster and the simulated registrar.
async fn open_cache(config: &Config) -> Result<DeviceCache> {
    let store = Arc::new(JsonFileDocumentStore::new(config.persistence.data_dir()));
    let persister = DocumentPersister::new(
        store,
        config.persistence.roster_doc_id.clone(),
        RetryPolicy::from(&config.persistence),
    );
    let registrar = Arc::new(SimulatedRegistrar::new(&config.registrar));
    let cache = DeviceCache::new(
        config.allocator.clone(),
        registrar.clone(),
        Arc::new(InMemoryReservations::new()),
        persister,
    );
    cache.load().await.context("failed to load device roster")?;

    let roster = cache.snapshot();
    registrar.adopt(roster.devices.iter().map(|d| d.device_id.as_str()));
    Ok(cache)
}

/// Handle `fleetshare allocate`.
pub(crate) async fn cmd_allocate(config: &Config, count: usize) -> Result<()> {
    let cache = open_cache(config).await?;
    let devices = cache
        .allocate_simulation_devices(count)
        .await
        .with_context(|| format!("could not allocate {} device(s)", count))?;

    println!("Allocated {} of {} device(s):", devices.len(), count);
    for device in &devices {
        println!("  {}  ({})", device.device_id, device.type_id);
    }
    print_stats(&cache);
    warn_unsaved(&cache);
    Ok(())
}

/// Handle `fleetshare release <id>`.
pub(crate) async fn cmd_release(config: &Config, device_id: &str) -> Result<()> {
    let cache = open_cache(config).await?;
    let device = cache
        .get(device_id)
        .with_context(|| format!("unknown device {}", device_id))?;
    cache.release_device(&device).await?;
    println!("Released {}", device_id);
    print_stats(&cache);
    warn_unsaved(&cache);
    Ok(())
}

/// Handle `fleetshare delete <id> [--force]`.
pub(crate) async fn cmd_delete(config: &Config, device_id: &str, force: bool) -> Result<()> {
    let cache = open_cache(config).await?;
    let device = cache
        .get(device_id)
        .with_context(|| format!("unknown device {}", device_id))?;
    cache.delete_device(&device, force).await?;
    println!("Deleted {}", device_id);
    print_stats(&cache);
    warn_unsaved(&cache);
    Ok(())
}

/// Handle `fleetshare devices`.
pub(crate) async fn cmd_devices(config: &Config) -> Result<()> {
    let cache = open_cache(config).await?;
    let roster = cache.snapshot();
    if roster.devices.is_empty() {
        println!("No devices registered.");
        return Ok(());
    }

    println!("{:<24} {:<16} {:<10}", "Device", "Type", "State");
    println!("{}", "-".repeat(52));
    for device in &roster.devices {
        let state = if cache.is_reserved(&device.device_id) {
            "reserved"
        } else if cache.is_free(&device.device_id) {
            "free"
        } else {
            "-"
        };
        println!("{:<24} {:<16} {:<10}", device.device_id, device.type_id, state);
    }
    print_stats(&cache);
    Ok(())
}

/// The process exits right after a command, so a pending retry never runs.
fn warn_unsaved(cache: &DeviceCache) {
    if cache.has_unsaved_changes() {
        warn!("Roster save failed; exiting drops the pending retry and these changes are not persisted");
    }
}

fn print_stats(cache: &DeviceCache) {
    let stats = cache.stats();
    println!(
        "Pool: {} total, {} free, {} reserved",
        stats.total, stats.free, stats.reserved
    );
}
