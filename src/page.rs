//! Static page collaborator.
//!
//! Serves one HTML document for every path. The document is rendered once at
//! startup with the camera list and status port baked in; nothing here reads
//! the frame store.

use axum::Router;
use axum::body::Bytes;
use axum::response::Html;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::CameraConfig;
use crate::{RelayError, Result};

const TEMPLATE: &str = include_str!("assets/index.html");

#[derive(Serialize)]
struct PageCamera<'a> {
    id: &'a str,
    name: &'a str,
    port: u16,
}

/// Render the viewer page for cameras paired with their bound broadcast ports.
pub fn render_page<'a>(
    cameras: impl IntoIterator<Item = (&'a CameraConfig, u16)>,
    status_port: u16,
) -> Result<String> {
    let cameras: Vec<PageCamera<'_>> = cameras
        .into_iter()
        .map(|(camera, port)| PageCamera { id: camera.id.as_str(), name: &camera.name, port })
        .collect();

    let json = serde_json::to_string(&cameras).map_err(|e| RelayError::encode("page camera list", e))?;
    // Keep a `</script>` inside a name from closing the script element.
    let json = json.replace("</", "<\\/");

    Ok(TEMPLATE.replace("{{CAMERAS}}", &json).replace("{{STATUS_PORT}}", &status_port.to_string()))
}

/// HTTP server answering every request with the rendered page.
pub struct PageServer {
    listener: TcpListener,
    page: Bytes,
    cancel: CancellationToken,
}

impl PageServer {
    pub fn new(listener: TcpListener, page: String, cancel: CancellationToken) -> Self {
        Self { listener, page: Bytes::from(page), cancel }
    }

    fn router(page: Bytes) -> Router {
        Router::new().fallback(move || {
            let page = page.clone();
            async move { Html(page) }
        })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let Self { listener, page, cancel } = self;
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Page server listening");
        }

        let served = axum::serve(listener, Self::router(page))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await;
        if let Err(e) = served {
            error!(error = %e, "Page server failed");
        }
    }
}
