//! Core types shared by the relay pipeline.
//!
//! - [`CameraId`] names one configured camera
//! - [`FrameRecord`] is the latest-wins unit held by the frame store
//! - [`LinkState`] tracks a camera's ingest connector state machine
//! - [`UpdateRate`] controls frame subscription throttling
//! - [`IngestEnvelope`] and [`ViewerFrame`] are the JSON wire envelopes

mod camera;
mod frame;
mod link_state;
mod update_rate;
mod wire;

pub use camera::CameraId;
pub use frame::FrameRecord;
pub use link_state::LinkState;
pub use update_rate::UpdateRate;
pub use wire::{IngestEnvelope, ViewerFrame, WAITING_FOR_FIRST_FRAME};
