pub mod metrics;
pub mod streak;

pub use metrics::{Achievement, ProgressMetrics};
pub use streak::{StreakTracker, can_use_freeze, compute_streak};
