//! Error types for the relay pipeline.
//!
//! All errors implement `std::error::Error` and carry enough context (camera id,
//! peer address, bind address) to be logged without further decoration.
//!
//! ## Error Categories
//!
//! - **Transient connection errors**: refused/closed upstream sockets and read
//!   deadlines. Retried by the ingest connector with exponential backoff.
//! - **Unclassified upstream errors**: anything else the upstream side produces.
//!   Retried after a fixed pause, without consuming the retry budget.
//! - **Frame errors**: malformed envelopes, undecodable or unencodable images.
//!   The frame is dropped, the connection stays open.
//! - **Viewer errors**: a failed send to one viewer. Only that session is removed.
//! - **Startup errors**: bind failures and invalid configuration. These are the
//!   only errors that stop the process.
//!
//! ```rust
//! use camrelay::RelayError;
//!
//! let error = RelayError::connection_failed("front_view", "connection refused");
//! assert!(error.is_transient());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("[{camera}] upstream connection failed: {reason}")]
    Connection {
        camera: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[{camera}] no frame received for {duration:?}")]
    Timeout { camera: String, duration: Duration },

    #[error("[{camera}] unexpected upstream error: {reason}")]
    Upstream {
        camera: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid message format: {details}")]
    Protocol { details: String },

    #[error("Failed to decode frame: {details}")]
    Decode {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Failed to encode frame: {details}")]
    Encode {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[{camera}] max retries exceeded after {attempts} attempts")]
    RetryBudgetExhausted { camera: String, attempts: u32 },

    #[error("Send to viewer {peer} failed: {reason}")]
    ViewerSend { peer: String, reason: String },

    #[error("Failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Unknown camera '{camera}'")]
    UnknownCamera { camera: String },
}

impl RelayError {
    /// Returns whether the error is a transient upstream connection fault that the
    /// ingest connector retries on the exponential schedule.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Connection { .. } | RelayError::Timeout { .. })
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Connection { .. } => true,
            RelayError::Timeout { .. } => true,
            RelayError::Upstream { .. } => true,
            RelayError::Protocol { .. } => false,
            RelayError::Decode { .. } => false,
            RelayError::Encode { .. } => false,
            RelayError::RetryBudgetExhausted { .. } => false,
            RelayError::ViewerSend { .. } => false,
            RelayError::Bind { .. } => false,
            RelayError::Config { .. } => false,
            RelayError::UnknownCamera { .. } => false,
        }
    }

    /// Returns whether the error only invalidates the current frame, leaving the
    /// upstream connection usable.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            RelayError::Protocol { .. } | RelayError::Decode { .. } | RelayError::Encode { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::Connection { .. } => vec![
                "Check the camera source process is running",
                "Verify the upstream address and port in the configuration",
                "Check network reachability of the camera host",
            ],
            RelayError::Timeout { .. } => vec![
                "Check the camera is still capturing frames",
                "Increase ingest.read_timeout_ms for slow sources",
            ],
            RelayError::Upstream { .. } => vec![
                "Check the upstream endpoint speaks WebSocket",
                "Verify the upstream URL scheme and host name",
            ],
            RelayError::Protocol { .. } => vec![
                "Ensure the source sends {\"image\": <base64>} envelopes",
                "Check the base64 payload is not truncated",
            ],
            RelayError::Decode { .. } => vec![
                "Ensure the source encodes frames as JPEG or PNG",
                "Check the source is not sending partial frames",
            ],
            RelayError::Encode { .. } => {
                vec!["Check ingest.jpeg_quality", "Check the decoded frame dimensions"]
            }
            RelayError::RetryBudgetExhausted { .. } => vec![
                "Restart the camera source and then the relay",
                "Increase ingest.max_retries",
            ],
            RelayError::ViewerSend { .. } => {
                vec!["Viewer disconnected or is too slow; it may reconnect"]
            }
            RelayError::Bind { .. } => vec![
                "Check no other process is listening on the port",
                "Check permissions for privileged ports",
                "Adjust the port in the configuration",
            ],
            RelayError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Run with --check to print the effective configuration",
            ],
            RelayError::UnknownCamera { .. } => vec!["Check the camera id against the configuration"],
        }
    }

    /// Helper constructor for transient connection errors.
    pub fn connection_failed(camera: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::Connection { camera: camera.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for transient connection errors with source.
    pub fn connection_failed_with_source(
        camera: impl Into<String>,
        reason: impl Into<String>,
        source: BoxError,
    ) -> Self {
        RelayError::Connection { camera: camera.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for unclassified upstream errors.
    pub fn upstream(camera: impl Into<String>, reason: impl Into<String>, source: BoxError) -> Self {
        RelayError::Upstream { camera: camera.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for malformed envelopes.
    pub fn protocol(details: impl Into<String>) -> Self {
        RelayError::Protocol { details: details.into() }
    }

    /// Helper constructor for image decode failures.
    pub fn decode(details: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RelayError::Decode { details: details.into(), source: Some(source.into()) }
    }

    /// Helper constructor for image encode failures.
    pub fn encode(details: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RelayError::Encode { details: details.into(), source: Some(source.into()) }
    }

    /// Helper constructor for viewer send failures.
    pub fn viewer_send(peer: impl ToString, reason: impl ToString) -> Self {
        RelayError::ViewerSend { peer: peer.to_string(), reason: reason.to_string() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for unknown camera lookups.
    pub fn unknown_camera(camera: impl Into<String>) -> Self {
        RelayError::UnknownCamera { camera: camera.into() }
    }
}
