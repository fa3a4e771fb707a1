//! Test utilities: image fixtures and a scripted fake camera source.
//!
//! Compiled for unit tests and for the `benchmark` feature so benches can
//! share the same fixtures.

#![cfg(any(test, feature = "benchmark"))]

use futures::{SinkExt, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::codec::encode_base64;

/// Gradient test pattern, so encoders have real content to work with.
pub fn test_pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    })
}

pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    test_pattern(width, height).write_to(&mut out, ImageFormat::Png).expect("encode PNG fixture");
    out.into_inner()
}

pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 95)
        .encode_image(&test_pattern(width, height))
        .expect("encode JPEG fixture");
    out
}

/// Wrap image bytes in a `{"image": <base64>}` ingest envelope.
pub fn envelope(image: &[u8]) -> String {
    serde_json::json!({ "image": encode_base64(image) }).to_string()
}

/// One step of a fake camera session.
#[derive(Debug, Clone)]
pub enum Script {
    Text(String),
    Binary(Vec<u8>),
    /// Wait until notified before continuing
    Wait(Arc<Notify>),
    /// Send a close frame and end the session
    Close,
    /// Keep the connection open without sending anything
    Stall,
}

/// A WebSocket camera source on an ephemeral loopback port.
///
/// Each accepted connection plays the next script. Once every script has been
/// used the listener is dropped, so further connection attempts are refused.
pub struct FakeCamera {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl FakeCamera {
    pub async fn start(sessions: Vec<Vec<Script>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake camera");
        let addr = listener.local_addr().expect("fake camera address");

        let task = tokio::spawn(async move {
            let mut players = JoinSet::new();
            for script in sessions {
                let Ok((stream, _)) = listener.accept().await else { break };
                players.spawn(play(stream, script));
            }
            drop(listener);
            while players.join_next().await.is_some() {}
        });

        Self { addr, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

async fn play(stream: TcpStream, script: Vec<Script>) {
    let Ok(mut ws) = accept_async(stream).await else { return };

    for step in script {
        let sent = match step {
            Script::Text(text) => ws.send(Message::text(text)).await,
            Script::Binary(bytes) => ws.send(Message::binary(bytes)).await,
            Script::Wait(notify) => {
                notify.notified().await;
                Ok(())
            }
            Script::Close => {
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
                return;
            }
            Script::Stall => {
                while let Some(Ok(_)) = ws.next().await {}
                return;
            }
        };
        if sent.is_err() {
            return;
        }
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.task.abort();
    }
}
