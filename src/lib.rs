//! fleetshare: backend pieces for a demo car-sharing fleet.
//!
//! - [`devices`] hands simulated vehicle devices out to simulation sessions
//!   and recycles them when the registrar runs dry
//! - [`store`] persists the device roster as a revisioned document
//! - [`weather`] caches weather lookups until their declared expiry
//! - [`rates`] turns forecasts into hourly rate recommendations
//! - [`scoring`] scores trips from detected driving behaviors

pub mod config;
pub mod devices;
pub mod error;
pub mod rates;
pub mod scoring;
pub mod store;
pub mod weather;

pub use config::Config;
pub use devices::{Device, DeviceCache, DeviceType};
pub use error::{FleetError, Result};
pub use weather::{WeatherQuery, WeatherService};
