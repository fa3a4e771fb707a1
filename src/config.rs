//! Relay configuration.
//!
//! Configuration is fixed for the process lifetime: it is loaded (or defaulted)
//! once at startup, validated, and then shared read-only with every task.
//! Every field has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! status_port: 9100
//! ingest:
//!   read_timeout_ms: 10000
//! cameras:
//!   - id: front_view
//!     name: Front View
//!     source_url: ws://192.168.0.5
//!     source_port: 8765
//!     broadcast_port: 9001
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::ingest::RetryPolicy;
use crate::types::CameraId;
use crate::{RelayError, Result};

/// Immutable per-camera configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Stable identifier, used as the store key and in every wire message
    pub id: CameraId,
    /// Display name sent to viewers
    pub name: String,
    /// Upstream WebSocket base URL, e.g. `ws://192.168.0.5`
    pub source_url: String,
    pub source_port: u16,
    /// Downstream port viewers connect to
    pub broadcast_port: u16,
}

impl CameraConfig {
    pub fn new(
        id: impl Into<CameraId>,
        name: impl Into<String>,
        source_url: impl Into<String>,
        source_port: u16,
        broadcast_port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_url: source_url.into(),
            source_port,
            broadcast_port,
        }
    }

    /// Upstream endpoint as `{source_url}:{source_port}`
    pub fn source_endpoint(&self) -> String {
        format!("{}:{}", self.source_url.trim_end_matches('/'), self.source_port)
    }
}

/// Ingest connector tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Length of one backoff time unit
    pub backoff_unit_ms: u64,
    pub max_retries: u32,
    pub max_backoff_units: u32,
    pub unexpected_pause_units: u32,
    pub jpeg_quality: u8,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            backoff_unit_ms: 1_000,
            max_retries: 5,
            max_backoff_units: 30,
            unexpected_pause_units: 5,
            jpeg_quality: 85,
        }
    }
}

impl IngestSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            unit: Duration::from_millis(self.backoff_unit_ms),
            max_retries: self.max_retries,
            max_backoff_units: self.max_backoff_units,
            unexpected_pause_units: self.unexpected_pause_units,
        }
    }
}

/// Broadcast server tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub tick_ms: u64,
    /// A viewer send slower than this counts as failed
    pub send_timeout_ms: u64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { tick_ms: 33, send_timeout_ms: 1_000 }
    }
}

impl BroadcastSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Status reporter tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub tick_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self { tick_ms: 1_000, send_timeout_ms: 1_000 }
    }
}

impl StatusSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address every listener binds to
    pub bind_address: IpAddr,
    pub status_port: u16,
    /// Static page port; `None` disables the page server
    pub page_port: Option<u16>,
    pub ingest: IngestSettings,
    pub broadcast: BroadcastSettings,
    pub status: StatusSettings,
    pub cameras: Vec<CameraConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        const ROVER: &str = "ws://192.168.0.5";
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            status_port: 9000,
            page_port: Some(8080),
            ingest: IngestSettings::default(),
            broadcast: BroadcastSettings::default(),
            status: StatusSettings::default(),
            cameras: vec![
                CameraConfig::new("front_view", "Front View", ROVER, 8765, 9001),
                CameraConfig::new("rear_view", "Rear View", ROVER, 8766, 9002),
                CameraConfig::new("top_view", "Top View", ROVER, 8767, 9003),
                CameraConfig::new("arm_camera", "Arm Camera", ROVER, 8768, 9004),
                CameraConfig::new("zed_rgb", "ZED RGB", ROVER, 8769, 9005),
                CameraConfig::new("zed_depth", "ZED Depth", ROVER, 8770, 9006),
                CameraConfig::new("extra_camera", "Extra Camera", ROVER, 8771, 9007),
            ],
        }
    }
}

impl RelayConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::config(path.display().to_string(), e.to_string()))?;
        let config = Self::from_yaml(&text)?;
        tracing::debug!(path = %path.display(), cameras = config.cameras.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate YAML configuration text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(text)
            .map_err(|e| RelayError::config("YAML", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| RelayError::config("YAML", e.to_string()))
    }

    pub fn broadcast_addr(&self, camera: &CameraConfig) -> SocketAddr {
        SocketAddr::new(self.bind_address, camera.broadcast_port)
    }

    pub fn status_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.status_port)
    }

    pub fn page_addr(&self) -> Option<SocketAddr> {
        self.page_port.map(|port| SocketAddr::new(self.bind_address, port))
    }

    pub fn camera(&self, id: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id.as_str() == id)
    }

    /// Check the configuration for values the relay cannot run with.
    ///
    /// Port 0 (OS-assigned) is allowed and exempt from the duplicate check.
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(RelayError::config("cameras", "at least one camera is required"));
        }

        let mut ids = HashSet::new();
        for camera in &self.cameras {
            if camera.id.as_str().trim().is_empty() {
                return Err(RelayError::config("cameras", "camera id must not be empty"));
            }
            if !ids.insert(camera.id.clone()) {
                return Err(RelayError::config(
                    "cameras",
                    format!("duplicate camera id '{}'", camera.id),
                ));
            }
        }

        let mut ports = HashSet::new();
        let listeners = self
            .cameras
            .iter()
            .map(|c| (c.broadcast_port, format!("cameras.{}.broadcast_port", c.id)))
            .chain(std::iter::once((self.status_port, "status_port".to_string())))
            .chain(self.page_port.map(|p| (p, "page_port".to_string())));
        for (port, context) in listeners {
            if port != 0 && !ports.insert(port) {
                return Err(RelayError::config(context, format!("port {port} is already in use")));
            }
        }

        let nonzero = [
            ("ingest.read_timeout_ms", self.ingest.read_timeout_ms),
            ("ingest.connect_timeout_ms", self.ingest.connect_timeout_ms),
            ("ingest.backoff_unit_ms", self.ingest.backoff_unit_ms),
            ("ingest.max_backoff_units", u64::from(self.ingest.max_backoff_units)),
            ("ingest.unexpected_pause_units", u64::from(self.ingest.unexpected_pause_units)),
            ("broadcast.tick_ms", self.broadcast.tick_ms),
            ("broadcast.send_timeout_ms", self.broadcast.send_timeout_ms),
            ("status.tick_ms", self.status.tick_ms),
            ("status.send_timeout_ms", self.status.send_timeout_ms),
        ];
        for (context, value) in nonzero {
            if value == 0 {
                return Err(RelayError::config(context, "must be greater than zero"));
            }
        }

        if !(1..=100).contains(&self.ingest.jpeg_quality) {
            return Err(RelayError::config(
                "ingest.jpeg_quality",
                format!("{} is outside 1..=100", self.ingest.jpeg_quality),
            ));
        }

        Ok(())
    }
}
