//! Per-item scheduling state, one record per learnable item.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Floor of the ease factor. The scheduler clamps to it and stores reject
/// anything below it as corrupt.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Learning stage of an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    New,
    Learning,
    Review,
    Mastered,
}

impl ItemStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
            Self::Mastered => "mastered",
        }
    }

    /// Returns `None` for unrecognized values so that unknown stored states
    /// surface as corruption instead of being coerced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "learning" => Some(Self::Learning),
            "review" => Some(Self::Review),
            "mastered" => Some(Self::Mastered),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling state of a single item.
///
/// Timestamps are kept at whole-second precision, matching what the store
/// persists, so a record read back compares equal to the one written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub item_id: String,
    pub status: ItemStatus,
    pub interval_days: u32,
    pub repetition_count: u32,
    pub ease_factor: f64,
    pub next_review_at: DateTime<Utc>,
    /// Past review timestamps, oldest first.
    #[serde(default)]
    pub history: Vec<DateTime<Utc>>,
}

impl ReviewRecord {
    /// State of an item that has never been reviewed. It is due immediately.
    pub fn new(item_id: impl Into<String>, initial_ease: f64, now: DateTime<Utc>) -> Self {
        Self {
            item_id: item_id.into(),
            status: ItemStatus::New,
            interval_days: 0,
            repetition_count: 0,
            ease_factor: initial_ease.max(MIN_EASE_FACTOR),
            next_review_at: now.trunc_subsecs(0),
            history: Vec::new(),
        }
    }

    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.next_review_at <= at
    }

    pub fn last_reviewed_at(&self) -> Option<DateTime<Utc>> {
        self.history.last().copied()
    }

    /// Checks the invariants every persisted record must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.item_id.is_empty() {
            return Err("empty item_id".to_string());
        }
        if !self.ease_factor.is_finite() || self.ease_factor < MIN_EASE_FACTOR {
            return Err(format!(
                "ease factor {} below minimum {}",
                self.ease_factor, MIN_EASE_FACTOR
            ));
        }
        if self.history.windows(2).any(|w| w[0] > w[1]) {
            return Err("history is not in chronological order".to_string());
        }
        Ok(())
    }
}
