//! Aggregate status reporter.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::StatusSettings;
use crate::store::FrameStore;
use crate::viewer;
use crate::{RelayError, Result};

/// Sends every subscriber the store's status snapshot once per tick.
pub struct StatusReporter {
    listener: TcpListener,
    store: Arc<FrameStore>,
    settings: StatusSettings,
    cancel: CancellationToken,
}

impl StatusReporter {
    pub fn new(
        listener: TcpListener,
        store: Arc<FrameStore>,
        settings: &StatusSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self { listener, store, settings: settings.clone(), cancel }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let Self { listener, store, settings, cancel } = self;
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Status reporter listening");
        }

        viewer::serve(listener, "status".to_string(), settings.tick(), settings.send_timeout(), cancel, || {
            render(&store)
        })
        .await;
    }
}

fn render(store: &FrameStore) -> Result<Message> {
    let text = serde_json::to_string(&store.status_snapshot())
        .map_err(|e| RelayError::encode("status snapshot", e))?;
    Ok(Message::text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    #[test]
    fn renders_every_camera_in_order() {
        let store = FrameStore::new(["zed_rgb", "front_view", "top_view"]);
        store.set_frame("top_view", vec![1u8], Utc::now()).unwrap();

        let message = render(&store).unwrap();
        let value: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();

        let cameras = value["cameras"].as_object().unwrap();
        let ids: Vec<&str> = cameras.keys().map(String::as_str).collect();
        assert_eq!(ids, ["front_view", "top_view", "zed_rgb"]);

        assert_eq!(cameras["top_view"]["frames_received"], 1);
        assert_eq!(cameras["top_view"]["connected"], false);
        assert!(cameras["top_view"]["last_frame"].is_string());
        assert!(cameras["zed_rgb"]["last_frame"].is_null());
        assert_eq!(cameras["zed_rgb"]["state"], "disconnected");
    }
}
