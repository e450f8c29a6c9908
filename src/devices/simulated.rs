//! In-process stand-ins for the IoT registrar and the reservation service.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::config::RegistrarConfig;
use crate::error::{FleetError, Result};

use super::{ActiveReservations, Device, DeviceRegistrar, DeviceType, IotCredentials};

#[derive(Default)]
struct RegistrarState {
    provisioned: HashSet<String>,
    connected: HashSet<String>,
}

/// Registrar that mints devices locally up to a fixed quota.
///
/// Once the quota is reached `create_devices` fails with a 403
/// [`FleetError::Provisioning`], which is what drives the allocation cache
/// into its reuse path.
pub struct SimulatedRegistrar {
    org: String,
    quota: usize,
    state: Mutex<RegistrarState>,
}

impl SimulatedRegistrar {
    pub fn new(config: &RegistrarConfig) -> Self {
        Self {
            org: config.org.clone(),
            quota: config.device_quota,
            state: Mutex::new(RegistrarState::default()),
        }
    }

    /// Mark devices as already registered (e.g. restored from a roster).
    pub fn adopt<'a>(&self, device_ids: impl IntoIterator<Item = &'a str>) {
        let mut state = self.lock();
        for id in device_ids {
            state.provisioned.insert(id.to_string());
        }
    }

    pub fn provisioned(&self) -> usize {
        self.lock().provisioned.len()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.lock().connected.contains(device_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistrarState> {
        self.state.lock().expect("registrar state lock poisoned")
    }
}

#[async_trait]
impl DeviceRegistrar for SimulatedRegistrar {
    async fn create_devices(&self, device_type: &DeviceType, count: usize) -> Result<Vec<Device>> {
        let mut state = self.lock();
        let remaining = self.quota.saturating_sub(state.provisioned.len());
        if remaining == 0 {
            return Err(FleetError::Provisioning {
                status: 403,
                message: format!("device quota of {} reached", self.quota),
            });
        }

        let devices: Vec<Device> = (0..count.min(remaining))
            .map(|_| {
                let nonce = Uuid::new_v4().simple().to_string();
                Device {
                    device_id: format!("{}-{}", device_type.id.to_lowercase(), &nonce[..12]),
                    type_id: device_type.id.clone(),
                    arch_device_guid: device_type.guid.clone(),
                    last_run_attributes_values: Vec::new(),
                    connected: false,
                    iotf_credentials: IotCredentials {
                        org: self.org.clone(),
                        password: Uuid::new_v4().simple().to_string(),
                    },
                }
            })
            .collect();
        for device in &devices {
            state.provisioned.insert(device.device_id.clone());
        }
        debug!(type_id = %device_type.id, count = devices.len(), "Simulated devices registered");
        Ok(devices)
    }

    async fn delete_device(&self, device: &Device) -> Result<()> {
        let mut state = self.lock();
        state.connected.remove(&device.device_id);
        if state.provisioned.remove(&device.device_id) {
            Ok(())
        } else {
            Err(FleetError::Provisioning {
                status: 404,
                message: format!("device {} is not registered", device.device_id),
            })
        }
    }

    fn connect_device(&self, device_id: &str) {
        debug!(device_id = %device_id, "Connect");
        self.lock().connected.insert(device_id.to_string());
    }

    fn disconnect_device(&self, device_id: &str) {
        debug!(device_id = %device_id, "Disconnect");
        self.lock().connected.remove(device_id);
    }
}

/// Reservation lookup backed by a set of busy device ids.
#[derive(Default)]
pub struct InMemoryReservations {
    active: Mutex<HashSet<String>>,
}

impl InMemoryReservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, device_id: &str) {
        self.lock().insert(device_id.to_string());
    }

    pub fn complete(&self, device_id: &str) {
        self.lock().remove(device_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().expect("reservation set lock poisoned")
    }
}

#[async_trait]
impl ActiveReservations for InMemoryReservations {
    async fn active_device_ids(&self, candidates: &[String]) -> Result<HashSet<String>> {
        let active = self.lock();
        Ok(candidates
            .iter()
            .filter(|id| active.contains(*id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registrar(quota: usize) -> SimulatedRegistrar {
        SimulatedRegistrar::new(&RegistrarConfig {
            org: "acme".into(),
            device_quota: quota,
        })
    }

    #[tokio::test]
    async fn test_creates_devices_until_quota() {
        let reg = registrar(3);
        let car = DeviceType::new("Car", "g");

        let first = reg.create_devices(&car, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].device_id.starts_with("car-"));
        assert_eq!(first[0].iotf_credentials.org, "acme");
        assert_eq!(first[0].arch_device_guid, "g");

        let second = reg.create_devices(&car, 5).await.unwrap();
        assert_eq!(second.len(), 1);

        let err = reg.create_devices(&car, 1).await.unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_delete_frees_quota() {
        let reg = registrar(1);
        let car = DeviceType::new("Car", "g");
        let devices = reg.create_devices(&car, 1).await.unwrap();
        reg.delete_device(&devices[0]).await.unwrap();
        assert_eq!(reg.provisioned(), 0);
        assert!(reg.delete_device(&devices[0]).await.is_err());
        assert_eq!(reg.create_devices(&car, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn test_connect_disconnect() {
        let reg = registrar(1);
        reg.connect_device("car-1");
        assert!(reg.is_connected("car-1"));
        reg.disconnect_device("car-1");
        assert!(!reg.is_connected("car-1"));
    }

    #[tokio::test]
    async fn test_active_reservations_filter() {
        let reservations = InMemoryReservations::new();
        reservations.activate("a");
        reservations.activate("z");
        let candidates = vec!["a".to_string(), "b".to_string()];
        let active = reservations.active_device_ids(&candidates).await.unwrap();
        assert_eq!(active, ["a".to_string()].into_iter().collect());

        reservations.complete("a");
        assert!(reservations
            .active_device_ids(&candidates)
            .await
            .unwrap()
            .is_empty());
    }
}
