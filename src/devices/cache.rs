//! Device allocation cache.
//!
//! Tracks simulated devices in three pools:
//!
//! - `devices`: every device known to the cache, by id
//! - `free`: idle devices per archetype guid, used as a stack
//! - `reserved`: ids currently handed out
//!
//! Allocation prefers free devices, then provisions new ones through the
//! [`DeviceRegistrar`], and as a last resort recycles reserved devices that
//! the [`AllocationHistory`] ranks as least recently used and that are not
//! part of an active reservation.
//!
//! Pool state sits behind a `std::sync::Mutex` that is never held across an
//! `.await`. Registrar and store calls run unlocked, so two concurrent
//! reservations may interleave; each re-locks and works against whatever the
//! pools look like on resumption.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AllocatorConfig;
use crate::error::{FleetError, Result};
use crate::store::DocumentPersister;

use super::history::{AllocationHistory, AllocationRecord};
use super::{ActiveReservations, Device, DeviceRegistrar, DeviceType};

/// Persisted form of the pools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub free: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub reserved: Vec<String>,
    #[serde(default)]
    pub allocation_history: Vec<AllocationRecord>,
}

/// Pool sizes at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
    pub reserved: usize,
    pub tracked: usize,
}

struct PoolState {
    devices: HashMap<String, Device>,
    free: HashMap<String, Vec<String>>,
    reserved: HashSet<String>,
    history: AllocationHistory,
}

impl PoolState {
    fn new(window_ms: i64) -> Self {
        Self {
            devices: HashMap::new(),
            free: HashMap::new(),
            reserved: HashSet::new(),
            history: AllocationHistory::new(window_ms),
        }
    }

    fn from_roster(roster: Roster, window_ms: i64) -> Self {
        let devices: HashMap<String, Device> = roster
            .devices
            .into_iter()
            .map(|d| (d.device_id.clone(), d))
            .collect();
        let reserved: HashSet<String> = roster
            .reserved
            .into_iter()
            .filter(|id| devices.contains_key(id))
            .collect();
        let free = roster
            .free
            .into_iter()
            .map(|(guid, ids)| {
                let ids = ids
                    .into_iter()
                    .filter(|id| devices.contains_key(id) && !reserved.contains(id))
                    .collect();
                (guid, ids)
            })
            .collect();
        let history = AllocationHistory::from_records(
            roster
                .allocation_history
                .into_iter()
                .filter(|r| devices.contains_key(&r.device_id))
                .collect(),
            window_ms,
        );
        Self {
            devices,
            free,
            reserved,
            history,
        }
    }

    fn roster(&self) -> Roster {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        let mut reserved: Vec<String> = self.reserved.iter().cloned().collect();
        reserved.sort();
        Roster {
            devices,
            free: self.free.clone(),
            reserved,
            allocation_history: self.history.records().to_vec(),
        }
    }

    fn is_free(&self, device_id: &str) -> bool {
        self.free
            .values()
            .any(|ids| ids.iter().any(|id| id == device_id))
    }

    /// Pop up to `count` free devices of `guid` and mark them reserved.
    fn take_free(&mut self, guid: &str, count: usize) -> Vec<Device> {
        let mut taken = Vec::new();
        while taken.len() < count {
            let Some(id) = self.free.get_mut(guid).and_then(Vec::pop) else {
                break;
            };
            if let Some(device) = self.devices.get(&id) {
                taken.push(device.clone());
                self.reserved.insert(id);
            }
        }
        taken
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.devices.len(),
            free: self.free.values().map(Vec::len).sum(),
            reserved: self.reserved.len(),
            tracked: self.history.len(),
        }
    }
}

/// Allocator for simulated devices. Construct once and share via `Arc`.
pub struct DeviceCache {
    state: Mutex<PoolState>,
    registrar: Arc<dyn DeviceRegistrar>,
    reservations: Arc<dyn ActiveReservations>,
    persister: DocumentPersister,
    config: AllocatorConfig,
}

impl DeviceCache {
    pub fn new(
        config: AllocatorConfig,
        registrar: Arc<dyn DeviceRegistrar>,
        reservations: Arc<dyn ActiveReservations>,
        persister: DocumentPersister,
    ) -> Self {
        Self {
            state: Mutex::new(PoolState::new(config.history_window_ms)),
            registrar,
            reservations,
            persister,
            config,
        }
    }

    /// Replace the pools with the persisted roster, if one exists.
    pub async fn load(&self) -> Result<()> {
        let Some(roster) = self.persister.load::<Roster>().await? else {
            debug!(doc_id = %self.persister.doc_id(), "No persisted roster, starting empty");
            return Ok(());
        };
        let state = PoolState::from_roster(roster, self.config.history_window_ms);
        let stats = state.stats();
        *self.lock() = state;
        info!(
            total = stats.total,
            free = stats.free,
            reserved = stats.reserved,
            "Device roster restored"
        );
        Ok(())
    }

    /// The registrar type used for simulated vehicles.
    pub fn simulator_type(&self) -> DeviceType {
        DeviceType::new(
            self.config.simulator_type_id.clone(),
            self.config.simulator_type_guid.clone(),
        )
    }

    /// Hand out up to `count` devices of `device_type`.
    ///
    /// Free devices are used first (most recently freed first). The shortfall
    /// is requested from the registrar, capped at `max_create_per_call`;
    /// surplus new devices go to the free pool. If the registrar fails after
    /// at least one free device was taken, the partial set is returned.
    pub async fn reserve_devices(&self, device_type: &DeviceType, count: usize) -> Result<Vec<Device>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut allocated = self.lock().take_free(&device_type.guid, count);

        if allocated.len() < count {
            let request = (count - allocated.len()).min(self.config.max_create_per_call);
            debug!(type_id = %device_type.id, request, "Requesting devices from registrar");
            match self.registrar.create_devices(device_type, request).await {
                Ok(created) => {
                    let mut state = self.lock();
                    for device in created {
                        let id = device.device_id.clone();
                        if allocated.len() < count {
                            state.reserved.insert(id.clone());
                            allocated.push(device.clone());
                        } else {
                            state
                                .free
                                .entry(device_type.guid.clone())
                                .or_default()
                                .push(id.clone());
                        }
                        state.devices.insert(id, device);
                    }
                }
                Err(e) if !allocated.is_empty() => {
                    warn!(
                        type_id = %device_type.id,
                        error = %e,
                        allocated = allocated.len(),
                        requested = count,
                        "Registrar failed, returning partial allocation"
                    );
                }
                Err(e) => {
                    warn!(type_id = %device_type.id, error = %e, "Registrar failed, nothing allocated");
                    let message = match e {
                        FleetError::Provisioning { message, .. } => message,
                        other => other.to_string(),
                    };
                    return Err(FleetError::provisioning(message));
                }
            }
        }

        let ids: Vec<String> = allocated.iter().map(|d| d.device_id.clone()).collect();
        let roster = {
            let mut state = self.lock();
            state.history.update(&ids, now_ms());
            state.roster()
        };
        self.persister.save(&roster).await;

        info!(
            type_id = %device_type.id,
            allocated = allocated.len(),
            requested = count,
            "Devices reserved"
        );
        Ok(allocated)
    }

    /// Force-recycle reserved devices: disconnect them and clear their run
    /// history while leaving them reserved.
    ///
    /// Every id must currently be reserved. The disconnect is not confirmed;
    /// the call just waits the configured settle delay before returning.
    pub async fn reuse_devices(&self, device_ids: &[String]) -> Result<Vec<Device>> {
        let reused = {
            let mut state = self.lock();
            if let Some(missing) = device_ids.iter().find(|id| !state.reserved.contains(*id)) {
                return Err(FleetError::NotReserved(missing.clone()));
            }
            let mut reused = Vec::with_capacity(device_ids.len());
            for id in device_ids {
                if let Some(device) = state.devices.get_mut(id) {
                    device.reset_run_state();
                    reused.push(device.clone());
                }
            }
            reused
        };

        for device in &reused {
            self.registrar.disconnect_device(&device.device_id);
        }
        tokio::time::sleep(Duration::from_millis(self.config.reuse_settle_ms)).await;

        info!(count = reused.len(), "Devices reused");
        Ok(reused)
    }

    /// Return a reserved device to the free pool.
    pub async fn release_device(&self, device: &Device) -> Result<()> {
        let id = device.device_id.as_str();
        let roster = {
            let mut state = self.lock();
            if !state.reserved.contains(id) {
                return Err(FleetError::NotReserved(id.to_string()));
            }
            let guid = match state.devices.get_mut(id) {
                Some(known) => {
                    known.reset_run_state();
                    known.arch_device_guid.clone()
                }
                None => return Err(FleetError::DeviceNotFound(id.to_string())),
            };
            state.reserved.remove(id);
            state.free.entry(guid).or_default().push(id.to_string());
            state.roster()
        };

        self.registrar.disconnect_device(id);
        self.persister.save(&roster).await;
        debug!(device_id = %id, "Device released");
        Ok(())
    }

    /// Remove a device from every pool and unregister it.
    ///
    /// Refused with [`FleetError::DeviceReserved`] while the device is
    /// reserved, unless `force` is set.
    pub async fn delete_device(&self, device: &Device, force: bool) -> Result<()> {
        let id = device.device_id.as_str();
        let roster = {
            let mut state = self.lock();
            if state.reserved.contains(id) && !force {
                return Err(FleetError::DeviceReserved(id.to_string()));
            }
            state.reserved.remove(id);
            for ids in state.free.values_mut() {
                ids.retain(|free_id| free_id != id);
            }
            state.devices.remove(id);
            state.history.remove(id);
            state.roster()
        };

        self.persister.save(&roster).await;
        self.registrar.delete_device(device).await?;
        info!(device_id = %id, force, "Device deleted");
        Ok(())
    }

    /// Stamp a batch of allocated ids in the MRU list.
    pub fn update_allocation_history(&self, device_ids: &[String]) {
        self.lock().history.update(device_ids, now_ms());
    }

    /// Up to `count` reserved devices worth recycling, least recently used
    /// first, skipping any with an active reservation. Released devices keep
    /// their history record but are never candidates.
    pub async fn find_reusable_device_ids(&self, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let candidates: Vec<String> = {
            let state = self.lock();
            state
                .history
                .oldest(usize::MAX)
                .filter(|id| state.reserved.contains(*id))
                .take(count.saturating_mul(self.config.reuse_candidate_factor))
                .map(String::from)
                .collect()
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let active = self.reservations.active_device_ids(&candidates).await?;
        let reusable: Vec<String> = candidates
            .into_iter()
            .filter(|id| !active.contains(id))
            .take(count)
            .collect();
        debug!(requested = count, found = reusable.len(), "Reusable devices");
        Ok(reusable)
    }

    /// Allocate `count` simulator devices, recycling idle reserved ones when
    /// provisioning fails.
    pub async fn allocate_simulation_devices(&self, count: usize) -> Result<Vec<Device>> {
        let device_type = self.simulator_type();
        let provisioning_error = match self.reserve_devices(&device_type, count).await {
            Ok(devices) => return Ok(devices),
            Err(e) => e,
        };

        warn!(error = %provisioning_error, "Provisioning failed, looking for devices to reuse");
        let ids = match self.find_reusable_device_ids(count).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Active reservation lookup failed");
                Vec::new()
            }
        };
        if ids.is_empty() {
            return Err(provisioning_error);
        }

        let devices = self.reuse_devices(&ids).await?;
        let roster = {
            let mut state = self.lock();
            state.history.update(&ids, now_ms());
            state.roster()
        };
        self.persister.save(&roster).await;
        Ok(devices)
    }

    /// Look up a known device by id.
    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.lock().devices.get(device_id).cloned()
    }

    pub fn is_reserved(&self, device_id: &str) -> bool {
        self.lock().reserved.contains(device_id)
    }

    pub fn is_free(&self, device_id: &str) -> bool {
        self.lock().is_free(device_id)
    }

    /// Current persisted form of the pools.
    pub fn snapshot(&self) -> Roster {
        self.lock().roster()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats()
    }

    /// `true` while the last roster save is still waiting on a retry.
    pub fn has_unsaved_changes(&self) -> bool {
        self.persister.has_pending()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("device pool lock poisoned")
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{IotCredentials, MockActiveReservations, MockDeviceRegistrar};
    use crate::store::{DocumentStore, InMemoryDocumentStore, RetryPolicy};

    const GUID: &str = "car-guid";

    fn car_type() -> DeviceType {
        DeviceType::new("Car", GUID)
    }

    fn device(id: &str) -> Device {
        Device {
            device_id: id.to_string(),
            type_id: "Car".into(),
            arch_device_guid: GUID.into(),
            last_run_attributes_values: Vec::new(),
            connected: false,
            iotf_credentials: IotCredentials {
                org: "org".into(),
                password: "pw".into(),
            },
        }
    }

    fn devices(prefix: &str, n: usize) -> Vec<Device> {
        (0..n).map(|i| device(&format!("{prefix}{i}"))).collect()
    }

    fn test_config() -> AllocatorConfig {
        AllocatorConfig {
            simulator_type_id: "Car".into(),
            simulator_type_guid: GUID.into(),
            reuse_settle_ms: 0,
            ..AllocatorConfig::default()
        }
    }

    fn idle_reservations() -> MockActiveReservations {
        let mut reservations = MockActiveReservations::new();
        reservations
            .expect_active_device_ids()
            .returning(|_| Ok(HashSet::new()));
        reservations
    }

    fn build(
        registrar: MockDeviceRegistrar,
        reservations: MockActiveReservations,
    ) -> (DeviceCache, InMemoryDocumentStore) {
        let store = InMemoryDocumentStore::new();
        let persister = DocumentPersister::new(
            Arc::new(store.clone()),
            "roster",
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
        );
        let cache = DeviceCache::new(
            test_config(),
            Arc::new(registrar),
            Arc::new(reservations),
            persister,
        );
        (cache, store)
    }

    /// Put devices straight into the free pool.
    fn seed_free(cache: &DeviceCache, seeded: Vec<Device>) {
        let mut state = cache.lock();
        for d in seeded {
            state
                .free
                .entry(d.arch_device_guid.clone())
                .or_default()
                .push(d.device_id.clone());
            state.devices.insert(d.device_id.clone(), d);
        }
    }

    async fn roster_generation(store: &InMemoryDocumentStore) -> u64 {
        store
            .get("roster")
            .await
            .unwrap()
            .map(|d| d.generation())
            .unwrap_or(0)
    }

    fn assert_pools_disjoint(cache: &DeviceCache) {
        let state = cache.lock();
        for ids in state.free.values() {
            for id in ids {
                assert!(!state.reserved.contains(id), "{id} both free and reserved");
            }
        }
    }

    #[tokio::test]
    async fn test_enough_free_devices_skips_registrar() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_create_devices().never();
        let (cache, store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 4));

        let got = cache.reserve_devices(&car_type(), 3).await.unwrap();
        assert_eq!(got.len(), 3);
        // stack order: last freed comes out first
        assert_eq!(got[0].device_id, "f3");
        assert_eq!(cache.stats().free, 1);
        assert_eq!(cache.stats().reserved, 3);
        assert_pools_disjoint(&cache);
        assert_eq!(roster_generation(&store).await, 1);
    }

    #[tokio::test]
    async fn test_two_free_plus_three_new() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .withf(|t, n| t.guid == GUID && *n == 3)
            .times(1)
            .returning(|_, n| Ok(devices("new", n)));
        let (cache, store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 2));

        let got = cache.reserve_devices(&car_type(), 5).await.unwrap();
        assert_eq!(got.len(), 5);
        let stats = cache.stats();
        assert_eq!(stats.free, 0);
        assert_eq!(stats.reserved, 5);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.tracked, 5);
        assert_eq!(roster_generation(&store).await, 1);

        let ids: HashSet<String> = got.iter().map(|d| d.device_id.clone()).collect();
        for id in ["f0", "f1", "new0", "new1", "new2"] {
            assert!(ids.contains(id));
        }
    }

    #[tokio::test]
    async fn test_registrar_request_is_capped() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .withf(|_, n| *n == 30)
            .times(1)
            .returning(|_, n| Ok(devices("new", n)));
        let (cache, _store) = build(registrar, idle_reservations());

        let got = cache.reserve_devices(&car_type(), 45).await.unwrap();
        assert_eq!(got.len(), 30);
    }

    #[tokio::test]
    async fn test_surplus_devices_go_to_free_pool() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .returning(|_, n| Ok(devices("new", n + 2)));
        let (cache, _store) = build(registrar, idle_reservations());

        let got = cache.reserve_devices(&car_type(), 2).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(cache.stats().free, 2);
        assert!(cache.is_free("new2"));
        assert!(cache.is_reserved("new0"));
        assert_pools_disjoint(&cache);
    }

    #[tokio::test]
    async fn test_registrar_failure_with_partial_allocation() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_create_devices().returning(|_, _| {
            Err(FleetError::Provisioning {
                status: 403,
                message: "quota".into(),
            })
        });
        let (cache, store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 1));

        let got = cache.reserve_devices(&car_type(), 3).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(roster_generation(&store).await, 1);
    }

    #[tokio::test]
    async fn test_registrar_failure_with_nothing_allocated() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_create_devices().returning(|_, _| {
            Err(FleetError::Provisioning {
                status: 403,
                message: "quota".into(),
            })
        });
        let (cache, store) = build(registrar, idle_reservations());

        let err = cache.reserve_devices(&car_type(), 3).await.unwrap_err();
        assert_eq!(err.status(), 500);
        assert!(err.to_string().contains("quota"));
        assert_eq!(roster_generation(&store).await, 0);
    }

    #[tokio::test]
    async fn test_zero_count_is_empty() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_create_devices().never();
        let (cache, _store) = build(registrar, idle_reservations());
        assert!(cache.reserve_devices(&car_type(), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allocate_falls_back_to_reuse() {
        let mut registrar = MockDeviceRegistrar::new();
        let mut created = false;
        registrar.expect_create_devices().returning(move |_, n| {
            if created {
                Err(FleetError::provisioning("quota exhausted"))
            } else {
                created = true;
                Ok(devices("d", n))
            }
        });
        registrar.expect_disconnect_device().times(2).return_const(());
        let mut reservations = MockActiveReservations::new();
        reservations
            .expect_active_device_ids()
            .returning(|_| Ok(["d3".to_string()].into_iter().collect()));
        let (cache, _store) = build(registrar, reservations);

        let first = cache.allocate_simulation_devices(4).await.unwrap();
        assert_eq!(first.len(), 4);

        // batch order d0..d3 -> d3 is the most reusable but is active
        let again = cache.allocate_simulation_devices(2).await.unwrap();
        let ids: Vec<&str> = again.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d1"]);
        assert_eq!(cache.stats().reserved, 4);
    }

    #[tokio::test]
    async fn test_allocate_fails_without_reuse_candidates() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .returning(|_, _| Err(FleetError::provisioning("registrar unreachable")));
        let mut reservations = MockActiveReservations::new();
        reservations.expect_active_device_ids().never();
        let (cache, _store) = build(registrar, reservations);

        let err = cache.allocate_simulation_devices(2).await.unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn test_reuse_rejects_unreserved_device() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_disconnect_device().never();
        let (cache, _store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 1));

        let err = cache.reuse_devices(&["f0".to_string()]).await.unwrap_err();
        assert!(matches!(err, FleetError::NotReserved(id) if id == "f0"));
    }

    #[tokio::test]
    async fn test_reuse_clears_run_state_and_keeps_reservation() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_disconnect_device()
            .withf(|id| id == "f0")
            .times(1)
            .return_const(());
        let (cache, _store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 1));
        cache.reserve_devices(&car_type(), 1).await.unwrap();
        {
            let mut state = cache.lock();
            let d = state.devices.get_mut("f0").unwrap();
            d.connected = true;
            d.last_run_attributes_values.push(crate::devices::AttributeValue {
                name: "speed".into(),
                value: serde_json::json!(42),
            });
        }

        let reused = cache.reuse_devices(&["f0".to_string()]).await.unwrap();
        assert_eq!(reused.len(), 1);
        assert!(reused[0].last_run_attributes_values.is_empty());
        assert!(!reused[0].connected);
        assert!(cache.is_reserved("f0"));
    }

    #[tokio::test]
    async fn test_release_moves_device_to_free() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_disconnect_device().times(1).return_const(());
        let (cache, store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 1));
        let got = cache.reserve_devices(&car_type(), 1).await.unwrap();

        cache.release_device(&got[0]).await.unwrap();
        assert!(cache.is_free("f0"));
        assert!(!cache.is_reserved("f0"));
        assert_eq!(roster_generation(&store).await, 2);

        let err = cache.release_device(&got[0]).await.unwrap_err();
        assert!(matches!(err, FleetError::NotReserved(_)));
    }

    #[tokio::test]
    async fn test_delete_reserved_requires_force() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_delete_device()
            .times(1)
            .returning(|_| Ok(()));
        let (cache, _store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 1));
        let got = cache.reserve_devices(&car_type(), 1).await.unwrap();

        let err = cache.delete_device(&got[0], false).await.unwrap_err();
        assert_eq!(err.to_string(), "Device is reserved.");
        assert!(cache.is_reserved("f0"));

        cache.delete_device(&got[0], true).await.unwrap();
        assert!(!cache.is_reserved("f0"));
        assert!(!cache.is_free("f0"));
        assert!(cache.get("f0").is_none());
        assert_eq!(cache.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn test_delete_free_device_without_force() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar.expect_delete_device().times(1).returning(|_| Ok(()));
        let (cache, _store) = build(registrar, idle_reservations());
        seed_free(&cache, devices("f", 2));

        cache.delete_device(&device("f1"), false).await.unwrap();
        assert!(cache.get("f1").is_none());
        assert_eq!(cache.stats().free, 1);
    }

    #[tokio::test]
    async fn test_find_reusable_skips_active_and_limits_candidates() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .returning(|_, n| Ok(devices("d", n)));
        let mut reservations = MockActiveReservations::new();
        reservations
            .expect_active_device_ids()
            .withf(|candidates| candidates.len() == 3)
            .returning(|candidates| Ok(candidates.iter().take(2).cloned().collect()));
        let (cache, _store) = build(registrar, reservations);
        cache.reserve_devices(&car_type(), 6).await.unwrap();

        // candidates are the 3 oldest: d5, d4, d3; d5 and d4 are active
        let ids = cache.find_reusable_device_ids(1).await.unwrap();
        assert_eq!(ids, vec!["d3".to_string()]);
    }

    #[tokio::test]
    async fn test_released_device_is_not_a_reuse_candidate() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .returning(|_, _| Err(FleetError::provisioning("quota exhausted")));
        // one release, one reuse
        registrar.expect_disconnect_device().times(2).return_const(());
        let (cache, _store) = build(registrar, idle_reservations());

        let truck_type = DeviceType::new("Truck", "truck-guid");
        let mut truck = device("t0");
        truck.type_id = "Truck".into();
        truck.arch_device_guid = "truck-guid".into();
        seed_free(&cache, vec![truck]);
        let trucks = cache.reserve_devices(&truck_type, 1).await.unwrap();
        cache.release_device(&trucks[0]).await.unwrap();

        seed_free(&cache, devices("c", 2));
        cache.reserve_devices(&car_type(), 2).await.unwrap();
        {
            // t0 is the least recently used record
            let mut state = cache.lock();
            state.history = AllocationHistory::new(0);
            state.history.update(&["t0".to_string()], 1_000);
            state
                .history
                .update(&["c0".to_string(), "c1".to_string()], 2_000);
        }

        let reused = cache.allocate_simulation_devices(1).await.unwrap();
        assert_eq!(reused.len(), 1);
        assert!(reused[0].device_id.starts_with('c'));
        assert!(cache.is_free("t0"));
        assert!(!cache.is_reserved("t0"));
        assert_pools_disjoint(&cache);
    }

    #[tokio::test]
    async fn test_failed_roster_save_is_reported_unsaved() {
        let mut store = crate::store::MockDocumentStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_put()
            .returning(|_| Err(FleetError::Store("database unavailable".into())));
        let persister = DocumentPersister::new(
            Arc::new(store),
            "roster",
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_secs(60),
            },
        );
        let cache = DeviceCache::new(
            test_config(),
            Arc::new(MockDeviceRegistrar::new()),
            Arc::new(idle_reservations()),
            persister,
        );
        assert!(!cache.has_unsaved_changes());

        seed_free(&cache, devices("f", 1));
        cache.reserve_devices(&car_type(), 1).await.unwrap();
        assert!(cache.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_load_restores_roster() {
        let mut registrar = MockDeviceRegistrar::new();
        registrar
            .expect_create_devices()
            .returning(|_, n| Ok(devices("d", n + 1)));
        let (cache, store) = build(registrar, idle_reservations());
        cache.reserve_devices(&car_type(), 2).await.unwrap();

        let persister = DocumentPersister::new(
            Arc::new(store.clone()),
            "roster",
            RetryPolicy::default(),
        );
        let restored = DeviceCache::new(
            test_config(),
            Arc::new(MockDeviceRegistrar::new()),
            Arc::new(MockActiveReservations::new()),
            persister,
        );
        restored.load().await.unwrap();
        assert_eq!(restored.stats(), cache.stats());
        assert_eq!(restored.snapshot(), cache.snapshot());
    }

    #[test]
    fn test_roster_restore_drops_dangling_ids() {
        let roster = Roster {
            devices: vec![device("a"), device("b")],
            free: [(GUID.to_string(), vec!["a".into(), "ghost".into(), "b".into()])]
                .into_iter()
                .collect(),
            reserved: vec!["b".into(), "ghost".into()],
            allocation_history: Vec::new(),
        };
        let state = PoolState::from_roster(roster, 600_000);
        assert_eq!(state.free[GUID], vec!["a".to_string()]);
        assert_eq!(state.reserved.len(), 1);
    }
}
