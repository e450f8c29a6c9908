//! Error types for fleetshare.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is [`FleetError`]. Callers that need an HTTP-style code (the CLI, or a
//! future REST surface) use [`FleetError::status`].

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum FleetError {
    /// A device was asked to be deleted while it is still reserved.
    #[error("Device is reserved.")]
    DeviceReserved(String),

    /// The operation requires the device to be reserved, and it is not.
    #[error("device {0} is not reserved")]
    NotReserved(String),

    /// No device with this id is known to the allocation cache.
    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// The device registrar refused or failed to provision devices.
    #[error("provisioning failed ({status}): {message}")]
    Provisioning { status: u16, message: String },

    /// Optimistic-concurrency conflict on a stored document.
    #[error("document conflict: {0}")]
    Conflict(String),

    /// The document store is unreachable or returned garbage.
    #[error("store error: {0}")]
    Store(String),

    /// Weather provider transport or payload failure.
    #[error("weather error: {0}")]
    Weather(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Build a provisioning error with the generic 500 status.
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            status: 500,
            message: message.into(),
        }
    }

    /// HTTP-style status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::DeviceReserved(_) => 409,
            Self::NotReserved(_) => 400,
            Self::DeviceNotFound(_) => 404,
            Self::Provisioning { status, .. } => *status,
            Self::Conflict(_) => 409,
            Self::Weather(_) => 502,
            Self::Store(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }

    /// `true` for caller mistakes that must not be retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::DeviceReserved(_) | Self::NotReserved(_) | Self::DeviceNotFound(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FleetError>;
