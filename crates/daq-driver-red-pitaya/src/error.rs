//! Error type for the Red Pitaya device facade.
//!
//! Every facade operation returns [`DeviceError`]. The `Display` text of each
//! variant is what ends up in the `data` field of an error response, so the
//! messages are written for the person reading them on the caller side.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for facade results.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors raised by a [`RedPitaya`](crate::RedPitaya) backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// A parameter was rejected before or by the hardware.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The scope never reported a trigger within the acquisition timeout.
    #[error("acquisition timed out after {0:?} without a trigger")]
    AcquisitionTimeout(Duration),

    /// The instrument returned a trace with no samples.
    #[error("acquisition returned an empty trace")]
    EmptyAcquisition,

    /// Transport or protocol failure while talking to the board.
    #[error("communication error: {0}")]
    Communication(String),

    /// The connection to the board could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The device connection has already been closed.
    #[error("device connection is closed")]
    Closed,
}

impl DeviceError {
    /// Build an [`DeviceError::InvalidParameter`] from anything printable.
    pub fn invalid(message: impl Into<String>) -> Self {
        DeviceError::InvalidParameter(message.into())
    }

    /// Map an `anyhow` error from the transport layer, keeping its context chain.
    pub fn communication(err: anyhow::Error) -> Self {
        DeviceError::Communication(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn communication_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("Failed to read response");
        let mapped = DeviceError::communication(err);
        let text = mapped.to_string();
        assert!(text.contains("Failed to read response"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn timeout_message_names_duration() {
        let err = DeviceError::AcquisitionTimeout(Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "acquisition timed out after 250ms without a trigger"
        );
    }
}
