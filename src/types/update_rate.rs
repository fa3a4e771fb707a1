//! Update rate control for frame subscriptions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for frame subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every stored frame, as fast as the source produces them
    Native,

    /// Throttled to maximum Hz (latest-wins)
    /// `Max(0)` and rates too high to express as an interval are treated as Native
    Max(u32),
}

impl UpdateRate {
    /// Get throttle interval if needed
    pub fn throttle_interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => {
                Some(Duration::from_secs_f64(1.0 / hz as f64)).filter(|interval| !interval.is_zero())
            }
        }
    }
}
