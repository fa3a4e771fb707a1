//! Upstream ingest: one connector task per camera.
//!
//! The connector keeps a camera's upstream connection alive, normalizes every
//! valid frame and writes it into the [`FrameStore`]. Its state is published
//! as the camera's [`LinkState`]:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Disconnected (retry) -> ... -> Failed
//! ```
//!
//! - A successful handshake resets the retry counter and marks the camera connected.
//! - Malformed envelopes and undecodable images are dropped; the connection stays open.
//! - A read deadline, a closed or refused connection bumps the retry counter and waits
//!   on the [`RetryPolicy`] schedule. Past the budget the camera is `Failed` for good.
//! - Any other upstream error waits a fixed pause without touching the counter.
//!
//! All waits race the shared cancellation token, so shutdown never waits for
//! a backoff to elapse.

mod backoff;
mod source;
mod websocket;

pub use backoff::RetryPolicy;
pub use source::{FrameSource, SourceConnector};
pub use websocket::{WebSocketConnector, WebSocketSource};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::config::{CameraConfig, IngestSettings};
use crate::store::FrameStore;
use crate::types::LinkState;
use crate::{RelayError, Result};

/// Upper bound on closing an upstream connection
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How a connector task ended
#[derive(Debug)]
pub enum IngestExit {
    /// Shutdown was requested
    Cancelled,
    /// Retry budget exhausted; the camera is in the terminal `Failed` state
    Failed(RelayError),
}

/// Ingest connector for one camera.
///
/// Built per camera from its own [`CameraConfig`]; connectors share nothing
/// but the store.
pub struct IngestConnector<C: SourceConnector> {
    camera: Arc<CameraConfig>,
    connector: C,
    store: Arc<FrameStore>,
    codec: FrameCodec,
    policy: RetryPolicy,
    read_timeout: Duration,
    cancel: CancellationToken,
}

impl<C: SourceConnector> IngestConnector<C> {
    pub fn new(
        camera: CameraConfig,
        connector: C,
        store: Arc<FrameStore>,
        settings: &IngestSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            camera: Arc::new(camera),
            connector,
            store,
            codec: FrameCodec::new(settings.jpeg_quality),
            policy: settings.retry_policy(),
            read_timeout: settings.read_timeout(),
            cancel,
        }
    }

    /// Spawn the connector onto the runtime.
    pub fn spawn(self) -> JoinHandle<IngestExit> {
        tokio::spawn(self.run())
    }

    /// Run the connector until cancelled or failed.
    pub async fn run(self) -> IngestExit {
        let id = self.camera.id.clone();
        let endpoint = self.camera.source_endpoint();
        info!(camera = %id, %endpoint, "Ingest connector started");

        let mut retry_count = 0u32;

        loop {
            self.set_state(LinkState::Connecting);
            info!(camera = %id, %endpoint, "Connecting");

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return self.cancelled(),
                result = self.connector.connect(&self.camera) => result,
            };

            let error = match connected {
                Ok(source) => {
                    retry_count = 0;
                    self.set_state(LinkState::Streaming);
                    info!(camera = %id, "Connected successfully");

                    match self.stream(source).await {
                        Some(error) => error,
                        None => return self.cancelled(),
                    }
                }
                Err(error) => error,
            };

            self.set_state(LinkState::Disconnected);

            let pause = if error.is_transient() {
                retry_count += 1;
                match self.policy.backoff(retry_count) {
                    Some(delay) => {
                        warn!(
                            camera = %id,
                            %error,
                            "Retrying in {:?} (attempt {}/{})",
                            delay,
                            retry_count,
                            self.policy.max_retries
                        );
                        delay
                    }
                    None => return self.give_up(retry_count),
                }
            } else {
                let pause = self.policy.unexpected_pause();
                error!(camera = %id, %error, "Unexpected error; retrying in {:?}", pause);
                pause
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Read until the connection is lost. Returns `None` on cancellation.
    async fn stream(&self, mut source: C::Source) -> Option<RelayError> {
        let id = self.camera.id.as_str();

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.close(&mut source).await;
                    return None;
                }
                next = tokio::time::timeout(self.read_timeout, source.next_message()) => next,
            };

            let text = match next {
                Err(_) => {
                    warn!(camera = id, "No frame received for {:?}", self.read_timeout);
                    self.close(&mut source).await;
                    return Some(RelayError::Timeout {
                        camera: id.to_string(),
                        duration: self.read_timeout,
                    });
                }
                Ok(Ok(Some(text))) => text,
                Ok(Ok(None)) => {
                    return Some(RelayError::connection_failed(id, "connection closed by source"));
                }
                Ok(Err(error)) if error.is_frame_error() => {
                    warn!(camera = id, "{error}");
                    continue;
                }
                Ok(Err(error)) => return Some(error),
            };

            match self.accept(text).await {
                Ok(frames) if frames % 30 == 0 => debug!(camera = id, frames, "Frames received"),
                Ok(_) => {}
                Err(error) => warn!(camera = id, "{error}"),
            }
        }
    }

    /// Normalize one inbound message and store it. Returns the frame count.
    async fn accept(&self, text: String) -> Result<u64> {
        let codec = self.codec;
        let jpeg = tokio::task::spawn_blocking(move || codec.normalize_envelope(&text))
            .await
            .map_err(|e| RelayError::decode("normalization task failed", e))??;

        self.store.set_frame(self.camera.id.as_str(), jpeg, Utc::now())
    }

    async fn close(&self, source: &mut C::Source) {
        if tokio::time::timeout(CLOSE_TIMEOUT, source.close()).await.is_err() {
            debug!(camera = %self.camera.id, "Upstream close timed out after {:?}", CLOSE_TIMEOUT);
        }
    }

    fn set_state(&self, state: LinkState) {
        if let Err(e) = self.store.set_link_state(self.camera.id.as_str(), state) {
            error!(camera = %self.camera.id, error = %e, "Failed to publish link state");
        }
    }

    fn give_up(&self, attempts: u32) -> IngestExit {
        self.set_state(LinkState::Failed);
        let error = RelayError::RetryBudgetExhausted { camera: self.camera.id.to_string(), attempts };
        error!(camera = %self.camera.id, "{error}. Giving up.");
        IngestExit::Failed(error)
    }

    fn cancelled(&self) -> IngestExit {
        self.set_state(LinkState::Disconnected);
        info!(camera = %self.camera.id, "Ingest connector stopped");
        IngestExit::Cancelled
    }
}
