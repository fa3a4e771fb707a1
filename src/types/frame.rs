//! Latest-frame record

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One normalized frame as held by a camera's store slot.
///
/// Records are immutable once stored; a newer frame replaces the slot's
/// `Arc` wholesale, so readers holding an older record are never affected.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Encoded image payload (canonical JPEG, zero-copy via Arc)
    pub payload: Arc<[u8]>,

    /// When the frame was stored
    pub timestamp: DateTime<Utc>,

    /// Per-camera counter, 1 for the first accepted frame
    pub sequence: u64,
}

impl FrameRecord {
    /// Create a new frame record
    pub fn new(payload: impl Into<Arc<[u8]>>, timestamp: DateTime<Utc>, sequence: u64) -> Self {
        Self { payload: payload.into(), timestamp, sequence }
    }
}
