//! Shared latest-frame store.
//!
//! One slot per configured camera, created once at startup. Each slot holds
//! the camera's most recent [`FrameRecord`] and its [`LinkState`], both in
//! `tokio::sync::watch` channels: the ingest connector is the single writer,
//! broadcast ticks and status snapshots are readers. A slot's channel is its
//! own guard, so there is no store-wide lock and cameras never contend.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

use crate::stream::ThrottleExt;
use crate::types::{CameraId, FrameRecord, LinkState, UpdateRate};
use crate::{RelayError, Result};

struct CameraSlot {
    frame: watch::Sender<Option<Arc<FrameRecord>>>,
    link: watch::Sender<LinkState>,
}

impl CameraSlot {
    fn new() -> Self {
        Self { frame: watch::Sender::new(None), link: watch::Sender::new(LinkState::Disconnected) }
    }
}

/// Per-camera connection and frame counters, as sent to status subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub connected: bool,
    pub frames_received: u64,
    pub last_frame: Option<DateTime<Utc>>,
    /// Connector state; distinguishes a retrying camera from a failed one
    #[serde(default)]
    pub state: LinkState,
}

/// Aggregate view over every camera slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cameras: BTreeMap<String, CameraStatus>,
}

/// Latest-wins frame store shared by all pipeline tasks.
pub struct FrameStore {
    slots: HashMap<CameraId, CameraSlot>,
}

impl FrameStore {
    /// Create a store with one empty slot per camera.
    pub fn new<I>(cameras: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<CameraId>,
    {
        let slots = cameras.into_iter().map(|id| (id.into(), CameraSlot::new())).collect();
        Self { slots }
    }

    fn slot(&self, camera: &str) -> Result<&CameraSlot> {
        self.slots.get(camera).ok_or_else(|| RelayError::unknown_camera(camera))
    }

    /// Configured camera ids, in no particular order.
    pub fn cameras(&self) -> impl Iterator<Item = &CameraId> {
        self.slots.keys()
    }

    /// Replace the camera's current frame and bump its counter.
    ///
    /// Never waits on readers. Returns the new frame's sequence number.
    pub fn set_frame(
        &self,
        camera: &str,
        payload: impl Into<Arc<[u8]>>,
        timestamp: DateTime<Utc>,
    ) -> Result<u64> {
        let slot = self.slot(camera)?;
        let payload = payload.into();
        let mut sequence = 0;

        slot.frame.send_modify(|current| {
            sequence = current.as_ref().map_or(0, |record| record.sequence) + 1;
            *current = Some(Arc::new(FrameRecord::new(payload, timestamp, sequence)));
        });

        trace!(camera, sequence, "Stored frame");
        Ok(sequence)
    }

    /// Most recent frame, or `None` before the first one is stored.
    pub fn get_frame(&self, camera: &str) -> Result<Option<Arc<FrameRecord>>> {
        Ok(self.slot(camera)?.frame.borrow().clone())
    }

    /// Number of frames accepted since start.
    pub fn frame_count(&self, camera: &str) -> Result<u64> {
        Ok(self.slot(camera)?.frame.borrow().as_ref().map_or(0, |record| record.sequence))
    }

    /// Update the camera's connector state. No-op if unchanged.
    pub fn set_link_state(&self, camera: &str, state: LinkState) -> Result<()> {
        self.slot(camera)?.link.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!(camera, from = %current, to = %state, "Link state changed");
            *current = state;
            true
        });
        Ok(())
    }

    /// Mark the camera connected (streaming) or disconnected.
    ///
    /// A camera in the terminal `Failed` state stays failed.
    pub fn set_connected(&self, camera: &str, connected: bool) -> Result<()> {
        if self.link_state(camera)?.is_terminal() {
            return Ok(());
        }
        let state = if connected { LinkState::Streaming } else { LinkState::Disconnected };
        self.set_link_state(camera, state)
    }

    pub fn link_state(&self, camera: &str) -> Result<LinkState> {
        Ok(*self.slot(camera)?.link.borrow())
    }

    pub fn is_connected(&self, camera: &str) -> Result<bool> {
        Ok(self.link_state(camera)?.is_connected())
    }

    /// Receiver notified on every link state change.
    pub fn watch_link(&self, camera: &str) -> Result<watch::Receiver<LinkState>> {
        Ok(self.slot(camera)?.link.subscribe())
    }

    /// Receiver notified on every stored frame.
    pub fn watch_frames(&self, camera: &str) -> Result<watch::Receiver<Option<Arc<FrameRecord>>>> {
        Ok(self.slot(camera)?.frame.subscribe())
    }

    /// Stream of the camera's frames, starting with the current one if any.
    ///
    /// Latest-wins: a slow consumer skips frames rather than queueing them.
    /// The stream ends when the store is dropped.
    pub fn frames(
        &self,
        camera: &str,
        rate: UpdateRate,
    ) -> Result<BoxStream<'static, Arc<FrameRecord>>> {
        let frames = WatchStream::new(self.watch_frames(camera)?).filter_map(|opt| async move { opt });

        Ok(match rate.throttle_interval() {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        })
    }

    /// Snapshot of every camera's connection state and counters.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        let cameras = self
            .slots
            .iter()
            .map(|(id, slot)| {
                let state = *slot.link.borrow();
                let frame = slot.frame.borrow();
                let status = CameraStatus {
                    connected: state.is_connected(),
                    frames_received: frame.as_ref().map_or(0, |record| record.sequence),
                    last_frame: frame.as_ref().map(|record| record.timestamp),
                    state,
                };
                (id.to_string(), status)
            })
            .collect();

        StatusSnapshot { timestamp: Utc::now(), cameras }
    }
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStore").field("cameras", &self.slots.len()).finish()
    }
}
