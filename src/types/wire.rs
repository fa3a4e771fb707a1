//! JSON envelopes exchanged with sources and viewers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound message from an upstream camera source: `{"image": "<base64>"}`.
///
/// Unknown fields are ignored; a missing or `null` image is malformed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestEnvelope {
    pub image: String,
}

/// Outbound message pushed to every viewer of a camera on each broadcast tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerFrame {
    pub camera_id: String,
    pub camera_name: String,
    pub timestamp: DateTime<Utc>,
    /// Base64 JPEG, or `null` before the first frame arrives
    pub image: Option<String>,
    pub source_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Text sent in place of an image until the camera's first frame is stored.
pub const WAITING_FOR_FIRST_FRAME: &str = "Waiting for first frame...";

impl ViewerFrame {
    /// Frame message carrying an image
    pub fn image(
        camera_id: impl Into<String>,
        camera_name: impl Into<String>,
        image: String,
        source_connected: bool,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            camera_name: camera_name.into(),
            timestamp: Utc::now(),
            image: Some(image),
            source_connected,
            message: None,
        }
    }

    /// Placeholder sent while no frame has been stored yet
    pub fn placeholder(
        camera_id: impl Into<String>,
        camera_name: impl Into<String>,
        source_connected: bool,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            camera_name: camera_name.into(),
            timestamp: Utc::now(),
            image: None,
            source_connected,
            message: Some(WAITING_FOR_FIRST_FRAME.to_string()),
        }
    }
}
