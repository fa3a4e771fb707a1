//! End-to-end relay tests over loopback WebSockets.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camrelay::{CameraConfig, Relay, RelayConfig, WAITING_FOR_FIRST_FRAME};
use futures::{SinkExt, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

fn frame_envelope() -> String {
    let pixels = image::RgbImage::from_fn(16, 12, |x, y| image::Rgb([x as u8 * 16, y as u8 * 20, 90]));
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 90).encode_image(&pixels).unwrap();
    serde_json::json!({ "image": STANDARD.encode(jpeg) }).to_string()
}

/// Upstream camera that accepts one connection, waits for `release`, sends
/// `frames` frames and then either holds the connection or closes it.
async fn fake_camera(frames: usize, release: Arc<Notify>, close_after: bool) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        release.notified().await;

        for _ in 0..frames {
            ws.send(Message::text(frame_envelope())).await.unwrap();
        }
        if close_after {
            let _ = ws.close(None).await;
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    (port, task)
}

fn config(source_port: u16) -> RelayConfig {
    RelayConfig {
        bind_address: Ipv4Addr::LOCALHOST.into(),
        status_port: 0,
        page_port: None,
        cameras: vec![CameraConfig::new("front_view", "Front View", "ws://127.0.0.1", source_port, 0)],
        ..RelayConfig::default()
    }
}

async fn connect(addr: SocketAddr) -> Viewer {
    let (ws, _) = timeout(WAIT, connect_async(format!("ws://{addr}"))).await.unwrap().unwrap();
    ws
}

async fn next_json(ws: &mut Viewer) -> Value {
    loop {
        let message = timeout(WAIT, ws.next()).await.expect("no message in time").unwrap().unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn next_image(ws: &mut Viewer) -> Value {
    loop {
        let frame = next_json(ws).await;
        if !frame["image"].is_null() {
            return frame;
        }
    }
}

#[tokio::test]
async fn viewer_gets_placeholder_then_image() {
    let _ = tracing_subscriber::fmt::try_init();
    let release = Arc::new(Notify::new());
    let (port, _camera) = fake_camera(1, release.clone(), false).await;
    let relay = Relay::start(config(port)).await.unwrap();

    let mut viewer = connect(relay.broadcast_addr("front_view").unwrap()).await;

    let first = next_json(&mut viewer).await;
    assert_eq!(first["camera_id"], "front_view");
    assert_eq!(first["camera_name"], "Front View");
    assert!(first["image"].is_null());
    assert_eq!(first["message"], WAITING_FOR_FIRST_FRAME);

    release.notify_one();

    let frame = next_image(&mut viewer).await;
    let jpeg = STANDARD.decode(frame["image"].as_str().unwrap()).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(frame["source_connected"], true);
    assert!(frame.get("message").is_none());
    assert!(frame["timestamp"].is_string());

    relay.shutdown().await;
}

#[tokio::test]
async fn status_reports_counts_and_disconnect() {
    let release = Arc::new(Notify::new());
    let (port, _camera) = fake_camera(3, release.clone(), true).await;
    let relay = Relay::start(config(port)).await.unwrap();
    let mut status = connect(relay.status_addr()).await;

    release.notify_one();

    let snapshot = loop {
        let snapshot = next_json(&mut status).await;
        let camera = &snapshot["cameras"]["front_view"];
        if camera["frames_received"] == 3 && camera["connected"] == false {
            break snapshot;
        }
    };

    assert!(snapshot["timestamp"].is_string());
    let camera = &snapshot["cameras"]["front_view"];
    assert!(camera["last_frame"].is_string());
    assert_eq!(snapshot["cameras"].as_object().unwrap().len(), 1);

    relay.shutdown().await;
}

#[tokio::test]
async fn dropped_viewer_does_not_affect_the_other() {
    let release = Arc::new(Notify::new());
    let (port, _camera) = fake_camera(1, release.clone(), false).await;
    release.notify_one();
    let relay = Relay::start(config(port)).await.unwrap();
    let addr = relay.broadcast_addr("front_view").unwrap();

    let mut staying = connect(addr).await;
    let mut leaving = connect(addr).await;
    next_json(&mut staying).await;
    next_json(&mut leaving).await;

    drop(leaving);

    for _ in 0..10 {
        let frame = next_json(&mut staying).await;
        assert_eq!(frame["camera_id"], "front_view");
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_viewers() {
    let release = Arc::new(Notify::new());
    let (port, _camera) = fake_camera(0, release, false).await;
    let relay = Relay::start(config(port)).await.unwrap();
    let mut viewer = connect(relay.broadcast_addr("front_view").unwrap()).await;
    next_json(&mut viewer).await;

    relay.shutdown().await;

    let closed = timeout(WAIT, async {
        loop {
            match viewer.next().await {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => continue,
                _ => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "viewer was not closed on shutdown");
}

#[tokio::test]
async fn failing_camera_does_not_affect_streaming_camera() {
    let refused_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let release = Arc::new(Notify::new());
    let (streaming_port, _camera) = fake_camera(3, release.clone(), false).await;

    let mut config = config(streaming_port);
    config.cameras.insert(0, CameraConfig::new("rear_view", "Rear View", "ws://127.0.0.1", refused_port, 0));
    let relay = Relay::start(config).await.unwrap();

    let mut status = connect(relay.status_addr()).await;
    let mut broken = connect(relay.broadcast_addr("rear_view").unwrap()).await;
    let mut viewer = connect(relay.broadcast_addr("front_view").unwrap()).await;
    release.notify_one();

    let frame = next_image(&mut viewer).await;
    assert_eq!(frame["camera_id"], "front_view");
    assert_eq!(frame["source_connected"], true);

    let placeholder = next_json(&mut broken).await;
    assert_eq!(placeholder["camera_id"], "rear_view");
    assert!(placeholder["image"].is_null());
    assert_eq!(placeholder["source_connected"], false);

    let snapshot = loop {
        let snapshot = next_json(&mut status).await;
        if snapshot["cameras"]["front_view"]["frames_received"] == 3 {
            break snapshot;
        }
    };
    let front = &snapshot["cameras"]["front_view"];
    assert_eq!(front["connected"], true);
    assert_eq!(front["state"], "streaming");

    let rear = &snapshot["cameras"]["rear_view"];
    assert_eq!(rear["connected"], false);
    assert_eq!(rear["frames_received"], 0);
    assert!(rear["last_frame"].is_null());
    assert_ne!(rear["state"], "streaming");

    relay.shutdown().await;
}
