//! Error types for k2bridge-server

use k2bridge_core::Modality;
use thiserror::Error;

/// Failures that stop the bridge. Each cause maps to its own process exit code.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No sensor device was detected: {0}")]
    DeviceNotFound(String),

    #[error("Unable to open the {0} frame reader")]
    ReaderUnavailable(Modality),

    #[error("Unable to open the device audio source")]
    AudioSourceUnavailable,

    #[error("Frame geometry of the {0} source is unavailable")]
    GeometryUnavailable(Modality),

    #[error("Unable to create face source [{0}]")]
    FaceSourceUnavailable(usize),

    #[error("Unable to create reader for face source [{0}]")]
    FaceReaderUnavailable(usize),

    #[error("Failed to bind {modality} channel to {address}: {source}")]
    Bind {
        modality: Modality,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] k2bridge_core::Error),

    #[error("{label} handler stopped: {source}")]
    Pipeline {
        label: String,
        #[source]
        source: HandlerError,
    },
}

impl BridgeError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            BridgeError::DeviceNotFound(_) => 1,
            BridgeError::ReaderUnavailable(_) => 2,
            BridgeError::AudioSourceUnavailable => 3,
            BridgeError::GeometryUnavailable(_) => 4,
            BridgeError::FaceSourceUnavailable(_) => 5,
            BridgeError::FaceReaderUnavailable(_) => 6,
            BridgeError::Bind { .. } => 7,
            BridgeError::Config(_) => 8,
            BridgeError::Pipeline { .. } => 9,
        }
    }
}

/// Failures reported by the device driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Device not found")]
    NotFound,

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Frame acquisition failed: {0}")]
    Acquisition(String),

    #[error("Frame data is {actual} bytes, destination holds {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Failure of a single handler tick.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A startup contract no longer holds; the pipeline cannot continue.
    #[error("Fatal contract violation: {0}")]
    Fatal(#[source] k2bridge_core::Error),

    /// Logged and the tick is dropped.
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl From<DriverError> for HandlerError {
    fn from(err: DriverError) -> Self {
        HandlerError::Unexpected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = vec![
            BridgeError::DeviceNotFound("none".to_string()),
            BridgeError::ReaderUnavailable(Modality::Body),
            BridgeError::AudioSourceUnavailable,
            BridgeError::GeometryUnavailable(Modality::Color),
            BridgeError::FaceSourceUnavailable(0),
            BridgeError::FaceReaderUnavailable(0),
            BridgeError::Bind {
                modality: Modality::Audio,
                address: "0.0.0.0:9004".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
            },
            BridgeError::Config(k2bridge_core::Error::Configuration("bad".to_string())),
            BridgeError::Pipeline {
                label: "color".to_string(),
                source: HandlerError::Unexpected("boom".to_string()),
            },
        ];

        let codes: HashSet<u8> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_driver_error_is_unexpected_handler_error() {
        let err: HandlerError = DriverError::Acquisition("torn".to_string()).into();
        assert!(matches!(err, HandlerError::Unexpected(msg) if msg.contains("torn")));
    }
}
