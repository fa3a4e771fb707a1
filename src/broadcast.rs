//! Per-camera broadcast server.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec::encode_base64;
use crate::config::{BroadcastSettings, CameraConfig};
use crate::store::FrameStore;
use crate::types::ViewerFrame;
use crate::viewer;
use crate::{RelayError, Result};

/// Pushes a camera's latest frame to all of its viewers on a fixed tick.
///
/// The tick is independent of the ingest rate: an unchanged frame is re-sent,
/// and frames stored between two ticks are skipped.
pub struct BroadcastServer {
    camera: Arc<CameraConfig>,
    listener: TcpListener,
    store: Arc<FrameStore>,
    settings: BroadcastSettings,
    cancel: CancellationToken,
}

impl BroadcastServer {
    pub fn new(
        camera: CameraConfig,
        listener: TcpListener,
        store: Arc<FrameStore>,
        settings: &BroadcastSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self { camera: Arc::new(camera), listener, store, settings: settings.clone(), cancel }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let Self { camera, listener, store, settings, cancel } = self;
        if let Ok(addr) = listener.local_addr() {
            info!(camera = %camera.id, %addr, "Broadcast server listening");
        }

        let mut renderer = FrameRenderer::new(camera.clone(), store);
        viewer::serve(listener, camera.id.to_string(), settings.tick(), settings.send_timeout(), cancel, || {
            renderer.render()
        })
        .await;
    }
}

/// Builds the per-tick viewer message, re-encoding base64 only when the
/// stored frame changes.
struct FrameRenderer {
    camera: Arc<CameraConfig>,
    store: Arc<FrameStore>,
    cached: Option<(u64, String)>,
}

impl FrameRenderer {
    fn new(camera: Arc<CameraConfig>, store: Arc<FrameStore>) -> Self {
        Self { camera, store, cached: None }
    }

    fn frame(&mut self) -> Result<ViewerFrame> {
        let id = self.camera.id.as_str();
        let connected = self.store.is_connected(id)?;

        let Some(record) = self.store.get_frame(id)? else {
            return Ok(ViewerFrame::placeholder(id, self.camera.name.as_str(), connected));
        };

        let image = match &self.cached {
            Some((sequence, image)) if *sequence == record.sequence => image.clone(),
            _ => {
                let image = encode_base64(&record.payload);
                self.cached = Some((record.sequence, image.clone()));
                image
            }
        };
        Ok(ViewerFrame::image(id, self.camera.name.as_str(), image, connected))
    }

    fn render(&mut self) -> Result<Message> {
        let frame = self.frame()?;
        let text = serde_json::to_string(&frame).map_err(|e| RelayError::encode("viewer message", e))?;
        Ok(Message::text(text))
    }
}
