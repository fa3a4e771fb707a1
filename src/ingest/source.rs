//! Upstream source abstraction

use crate::Result;
use crate::config::CameraConfig;

/// An open upstream connection delivering raw inbound messages.
///
/// Returns:
/// - `Ok(Some(text))` - next message (not yet validated)
/// - `Ok(None)` - the source closed the connection
/// - `Err(e)` - a frame error (the connection stays usable) or a transport error
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    async fn next_message(&mut self) -> Result<Option<String>>;

    /// Close the connection. Best effort; errors are ignored.
    async fn close(&mut self);
}

/// Opens upstream connections for a camera.
///
/// Implementations classify failures: refused/closed/reset connections must be
/// reported as transient [`RelayError::Connection`](crate::RelayError::Connection)
/// so the connector applies exponential backoff.
#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync + 'static {
    type Source: FrameSource;

    async fn connect(&self, camera: &CameraConfig) -> Result<Self::Source>;
}
