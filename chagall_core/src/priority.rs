use serde::{Deserialize, Serialize};
use strum::Display;

/// Priority classes for queued requests.
///
/// Dispatch order is `High > Medium > Low`; ties within a class are broken
/// FIFO by enqueue time. Already-running lower-priority work is never
/// preempted.
#[derive(
    Clone, Copy, Debug, Display, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Numeric rank used by the dispatcher's selection sort.
    /// Lower rank dispatches first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}
