//! Upstream link state for one camera

use serde::{Deserialize, Serialize};
use std::fmt;

/// States of a camera's ingest connector.
///
/// ```text
/// Disconnected -> Connecting -> Streaming -> Disconnected (retry) -> ... -> Failed
/// ```
///
/// `Failed` is terminal: the connector has exhausted its retry budget and no
/// longer attempts to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    Failed,
}

impl LinkState {
    /// Whether the upstream is currently connected.
    ///
    /// True only while streaming, i.e. between a successful handshake and the
    /// next disconnect or read timeout.
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Failed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Streaming => "streaming",
            LinkState::Failed => "failed",
        };
        f.write_str(name)
    }
}
