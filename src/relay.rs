//! Process wiring: binds every port, spawns every pipeline task and owns the
//! shared cancellation token.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastServer;
use crate::config::RelayConfig;
use crate::ingest::{IngestConnector, IngestExit, WebSocketConnector};
use crate::page::{PageServer, render_page};
use crate::status::StatusReporter;
use crate::store::FrameStore;
use crate::types::CameraId;
use crate::viewer;
use crate::{RelayError, Result};

/// How long [`Relay::shutdown`] waits for tasks before aborting them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running relay.
///
/// Dropping the handle cancels every task; call [`Relay::shutdown`] to also
/// wait for them to close their sockets.
pub struct Relay {
    store: Arc<FrameStore>,
    broadcast_addrs: HashMap<CameraId, SocketAddr>,
    status_addr: SocketAddr,
    page_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Relay {
    /// Validate `config`, bind every listener and start the pipeline.
    ///
    /// Bind failures are returned before any task is spawned.
    pub async fn start(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let mut broadcast_listeners = Vec::with_capacity(config.cameras.len());
        let mut broadcast_addrs = HashMap::with_capacity(config.cameras.len());
        for camera in &config.cameras {
            let (listener, addr) = listen(config.broadcast_addr(camera)).await?;
            broadcast_listeners.push(listener);
            broadcast_addrs.insert(camera.id.clone(), addr);
        }
        let (status_listener, status_addr) = listen(config.status_addr()).await?;
        let page = match config.page_addr() {
            Some(addr) => Some(listen(addr).await?),
            None => None,
        };
        let page_addr = page.as_ref().map(|(_, addr)| *addr);

        let store = Arc::new(FrameStore::new(config.cameras.iter().map(|camera| camera.id.clone())));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (camera, listener) in config.cameras.iter().zip(broadcast_listeners) {
            let connector = WebSocketConnector::new(config.ingest.connect_timeout());
            let ingest =
                IngestConnector::new(camera.clone(), connector, store.clone(), &config.ingest, cancel.child_token());
            let id = camera.id.clone();
            tasks.spawn(async move {
                if let IngestExit::Failed(error) = ingest.run().await {
                    warn!(camera = %id, %error, "Ingest stopped; camera stays failed");
                }
            });

            let server = BroadcastServer::new(
                camera.clone(),
                listener,
                store.clone(),
                &config.broadcast,
                cancel.child_token(),
            );
            tasks.spawn(server.run());
        }

        tasks.spawn(StatusReporter::new(status_listener, store.clone(), &config.status, cancel.child_token()).run());

        if let Some((listener, addr)) = page {
            let page = render_page(
                config.cameras.iter().map(|camera| (camera, broadcast_addrs[&camera.id].port())),
                status_addr.port(),
            )?;
            tasks.spawn(PageServer::new(listener, page, cancel.child_token()).run());
            info!(%addr, "Viewer page available");
        }

        info!(cameras = config.cameras.len(), %status_addr, "Relay started");

        Ok(Self { store, broadcast_addrs, status_addr, page_addr, cancel, tasks })
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    /// Bound broadcast address of a camera.
    pub fn broadcast_addr(&self, camera: &str) -> Result<SocketAddr> {
        self.broadcast_addrs.get(camera).copied().ok_or_else(|| RelayError::unknown_camera(camera))
    }

    pub fn status_addr(&self) -> SocketAddr {
        self.status_addr
    }

    pub fn page_addr(&self) -> Option<SocketAddr> {
        self.page_addr
    }

    /// Token cancelled when the relay shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for them to finish.
    ///
    /// Tasks still running after the grace period are aborted.
    pub async fn shutdown(mut self) {
        info!("Shutting down relay");
        self.cancel.cancel();

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Relay task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "Grace period elapsed; aborting remaining tasks");
            self.tasks.abort_all();
        }
        debug!("Relay stopped");
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("cameras", &self.broadcast_addrs.len())
            .field("status_addr", &self.status_addr)
            .field("page_addr", &self.page_addr)
            .finish()
    }
}

/// Bind `addr` and report the address actually bound (port 0 picks one).
async fn listen(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = viewer::bind(addr).await?;
    let bound = listener.local_addr().map_err(|source| RelayError::Bind { addr, source })?;
    Ok((listener, bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use std::net::Ipv4Addr;

    fn loopback_config() -> RelayConfig {
        RelayConfig {
            bind_address: Ipv4Addr::LOCALHOST.into(),
            status_port: 0,
            page_port: None,
            cameras: vec![
                CameraConfig::new("front_view", "Front View", "ws://127.0.0.1", 1, 0),
                CameraConfig::new("rear_view", "Rear View", "ws://127.0.0.1", 1, 0),
            ],
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn binds_ephemeral_ports_and_shuts_down() {
        let relay = Relay::start(loopback_config()).await.unwrap();

        let front = relay.broadcast_addr("front_view").unwrap();
        let rear = relay.broadcast_addr("rear_view").unwrap();
        assert_ne!(front.port(), 0);
        assert_ne!(front, rear);
        assert_ne!(relay.status_addr().port(), 0);
        assert!(relay.page_addr().is_none());
        assert!(relay.broadcast_addr("nope").is_err());
        assert_eq!(relay.store().cameras().count(), 2);

        let token = relay.cancellation_token();
        relay.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn port_conflict_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = loopback_config();
        config.status_port = taken.local_addr().unwrap().port();

        let err = Relay::start(config).await.unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }), "{err}");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let mut config = loopback_config();
        config.cameras.clear();

        let err = Relay::start(config).await.unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }), "{err}");
    }
}
