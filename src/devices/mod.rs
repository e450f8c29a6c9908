//! Simulated vehicle devices and the allocation cache that hands them out.
//!
//! - [`DeviceCache`] owns the free / reserved / all pools and the MRU list
//! - [`AllocationHistory`] orders devices for forced reuse
//! - [`DeviceRegistrar`] and [`ActiveReservations`] are the external
//!   collaborators the cache talks to
//! - [`SimulatedRegistrar`] and [`InMemoryReservations`] are in-process
//!   stand-ins used by the CLI and tests

pub mod cache;
pub mod history;
pub mod simulated;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cache::{DeviceCache, PoolStats, Roster};
pub use history::{AllocationHistory, AllocationRecord};
pub use simulated::{InMemoryReservations, SimulatedRegistrar};

/// A registrar device type and the archetype guid its free pool is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    pub id: String,
    pub guid: String,
}

impl DeviceType {
    pub fn new(id: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            guid: guid.into(),
        }
    }
}

/// One attribute value recorded during the device's last simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub name: String,
    pub value: serde_json::Value,
}

/// Credentials the device uses to connect to the IoT platform.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct IotCredentials {
    pub org: String,
    pub password: String,
}

impl std::fmt::Debug for IotCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IotCredentials")
            .field("org", &self.org)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A simulated vehicle registered with the IoT platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub type_id: String,
    pub arch_device_guid: String,
    #[serde(default)]
    pub last_run_attributes_values: Vec<AttributeValue>,
    #[serde(default)]
    pub connected: bool,
    pub iotf_credentials: IotCredentials,
}

impl Device {
    /// Forget everything recorded during the previous simulation run.
    pub fn reset_run_state(&mut self) {
        self.last_run_attributes_values.clear();
        self.connected = false;
    }
}

/// External device registration service.
///
/// Bulk operations are async and fail with
/// [`FleetError::Provisioning`](crate::error::FleetError::Provisioning);
/// connect / disconnect are fire-and-forget commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRegistrar: Send + Sync {
    /// Register `count` new devices of `device_type`.
    async fn create_devices(&self, device_type: &DeviceType, count: usize) -> Result<Vec<Device>>;

    /// Unregister a device.
    async fn delete_device(&self, device: &Device) -> Result<()>;

    fn connect_device(&self, device_id: &str);

    fn disconnect_device(&self, device_id: &str);
}

/// Lookup of devices currently busy with an active reservation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActiveReservations: Send + Sync {
    /// Return the subset of `candidates` that are active right now.
    async fn active_device_ids(&self, candidates: &[String]) -> Result<HashSet<String>>;
}
