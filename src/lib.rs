//! Multi-camera live frame relay.
//!
//! camrelay keeps one upstream WebSocket per camera alive, normalizes every
//! frame it receives to a canonical JPEG and fans the latest frame out to any
//! number of viewers on a fixed tick.
//!
//! # Pipeline
//!
//! ```text
//! camera source -> IngestConnector -> FrameStore -> BroadcastServer -> viewers
//!                                         |
//!                                         +-------> StatusReporter -> subscribers
//! ```
//!
//! - **Ingest** ([`ingest`]): reconnects with exponential backoff, drops
//!   malformed frames, gives up after a bounded number of retries.
//! - **Store** ([`FrameStore`]): latest-wins slot per camera, never blocks the writer.
//! - **Broadcast** ([`broadcast`]): ~30 Hz push of the current frame, or a
//!   placeholder until the first frame arrives.
//! - **Status** ([`status`]): per-camera connection and frame counters once a second.
//!
//! Cameras are independent: a failure in one camera's pipeline never affects
//! another. The only fatal error is failing to bind a port at startup.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use camrelay::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::load("relay.yaml")?;
//!     let relay = Relay::start(config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Frame pipeline
pub mod codec;
pub mod ingest;
pub mod store;
pub mod stream;

// Downstream servers
pub mod broadcast;
pub mod page;
pub mod status;
pub mod viewer;

// Process wiring
pub mod relay;

// Core exports
pub use config::{BroadcastSettings, CameraConfig, IngestSettings, RelayConfig, StatusSettings};
pub use error::*;
pub use types::*;

// Pipeline exports
pub use codec::FrameCodec;
pub use ingest::{IngestConnector, IngestExit, RetryPolicy};
pub use relay::Relay;
pub use store::{CameraStatus, FrameStore, StatusSnapshot};
pub use stream::ThrottleExt;
