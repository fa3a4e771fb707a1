//! WebSocket upstream sources

use futures::StreamExt;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use super::source::{FrameSource, SourceConnector};
use crate::config::CameraConfig;
use crate::types::CameraId;
use crate::{RelayError, Result};

/// Connects to camera sources speaking WebSocket at `source_url:source_port`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait::async_trait]
impl SourceConnector for WebSocketConnector {
    type Source = WebSocketSource;

    async fn connect(&self, camera: &CameraConfig) -> Result<WebSocketSource> {
        let endpoint = camera.source_endpoint();
        let attempt = tokio::time::timeout(self.connect_timeout, connect_async(endpoint.as_str()));

        match attempt.await {
            Err(_) => Err(RelayError::connection_failed(
                camera.id.as_str(),
                format!("handshake with {endpoint} timed out after {:?}", self.connect_timeout),
            )),
            Ok(Err(e)) => Err(classify(&camera.id, e)),
            Ok(Ok((stream, response))) => {
                debug!(camera = %camera.id, status = %response.status(), "Upstream handshake complete");
                Ok(WebSocketSource { camera: camera.id.clone(), stream })
            }
        }
    }
}

/// An open upstream WebSocket.
pub struct WebSocketSource {
    camera: CameraId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl FrameSource for WebSocketSource {
    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            let message = match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(classify(&self.camera, e)),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Some)
                        .map_err(|_| RelayError::protocol("binary message is not UTF-8 JSON"));
                }
                Message::Close(frame) => {
                    debug!(camera = %self.camera, ?frame, "Upstream sent close frame");
                    return Ok(None);
                }
                other => trace!(camera = %self.camera, kind = ?other, "Ignoring control message"),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(camera = %self.camera, error = %e, "Close on upstream failed");
        }
    }
}

/// Map a WebSocket error to the relay taxonomy.
///
/// Refused, reset and closed connections are transient; anything else
/// (bad URL, HTTP error during handshake, TLS, capacity) is unclassified.
pub(crate) fn classify(camera: &CameraId, error: WsError) -> RelayError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            RelayError::connection_failed(camera.as_str(), "connection closed")
        }
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            RelayError::connection_failed(camera.as_str(), "connection reset without closing handshake")
        }
        WsError::Io(io) if is_connection_io(io.kind()) => {
            RelayError::connection_failed_with_source(camera.as_str(), io.to_string(), Box::new(io))
        }
        other => RelayError::upstream(camera.as_str(), other.to_string(), Box::new(other)),
    }
}

fn is_connection_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeCamera, Script, envelope, sample_jpeg};

    fn camera_at(port: u16) -> CameraConfig {
        CameraConfig::new("bench", "Bench", "ws://127.0.0.1", port, 0)
    }

    #[tokio::test]
    async fn receives_text_and_binary_then_close() {
        let payload = envelope(&sample_jpeg(8, 8));
        let fake = FakeCamera::start(vec![vec![
            Script::Text(payload.clone()),
            Script::Binary(payload.clone().into_bytes()),
            Script::Close,
        ]])
        .await;

        let connector = WebSocketConnector::default();
        let mut source = connector.connect(&camera_at(fake.port())).await.unwrap();

        assert_eq!(source.next_message().await.unwrap(), Some(payload.clone()));
        assert_eq!(source.next_message().await.unwrap(), Some(payload));
        assert_eq!(source.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn idle_source_keeps_connection_open() {
        let release = std::sync::Arc::new(tokio::sync::Notify::new());
        let payload = envelope(&sample_jpeg(8, 8));
        let fake = FakeCamera::start(vec![vec![
            Script::Wait(release.clone()),
            Script::Text(payload.clone()),
            Script::Stall,
        ]])
        .await;

        let mut source = WebSocketConnector::default().connect(&camera_at(fake.port())).await.unwrap();
        let idle = tokio::time::timeout(Duration::from_millis(200), source.next_message()).await;
        assert!(idle.is_err(), "nothing sent yet");

        release.notify_one();
        assert_eq!(source.next_message().await.unwrap(), Some(payload));

        let stalled = tokio::time::timeout(Duration::from_millis(200), source.next_message()).await;
        assert!(stalled.is_err(), "stalled source keeps the connection open");
        source.close().await;
    }

    #[tokio::test]
    async fn non_utf8_binary_is_a_frame_error() {
        let fake = FakeCamera::start(vec![vec![Script::Binary(vec![0xFF, 0xFE]), Script::Close]]).await;

        let mut source = WebSocketConnector::default().connect(&camera_at(fake.port())).await.unwrap();
        let err = source.next_message().await.unwrap_err();
        assert!(err.is_frame_error(), "{err}");
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = match WebSocketConnector::default().connect(&camera_at(port)).await {
            Ok(_) => panic!("nothing is listening"),
            Err(e) => e,
        };
        assert!(err.is_transient(), "{err}");
    }

    #[test]
    fn bad_url_is_unclassified() {
        let camera = CameraId::new("bench");
        let error = classify(&camera, WsError::Url(tokio_tungstenite::tungstenite::error::UrlError::NoHostName));
        assert!(!error.is_transient());
        assert!(matches!(error, RelayError::Upstream { .. }));
    }
}
