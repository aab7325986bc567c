//! Named progress metrics and the achievements derived from them.
//!
//! Achievements are read-only consumers of the record store: each one is a
//! pure predicate over [`ProgressMetrics`].

use super::streak::StreakTracker;
use crate::database::RecordStore;
use crate::error::StorageError;
use crate::models::{ItemStatus, ReviewRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProgressMetrics {
    /// Reviews recorded across all items (bounded by the per-item history cap).
    pub total_reviews: usize,
    /// Items reviewed at least once.
    pub reviewed_items: usize,
    pub mastered_items: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
}

impl ProgressMetrics {
    /// Counts item-level metrics from `records`; streak fields are left at zero.
    pub fn from_records(records: &[ReviewRecord]) -> Self {
        Self {
            total_reviews: records.iter().map(|r| r.history.len()).sum(),
            reviewed_items: records
                .iter()
                .filter(|r| r.status != ItemStatus::New || !r.history.is_empty())
                .count(),
            mastered_items: records
                .iter()
                .filter(|r| r.status == ItemStatus::Mastered)
                .count(),
            ..Self::default()
        }
    }

    pub fn collect(
        records: &RecordStore,
        streaks: &StreakTracker,
        now: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            current_streak: streaks.current_streak(now)?,
            longest_streak: streaks.longest_streak()?,
            ..Self::from_records(&records.all()?)
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstReview,
    TenItemsStarted,
    FirstMastery,
    WeekStreak,
    MonthStreak,
    HundredReviews,
}

impl Achievement {
    pub const ALL: [Achievement; 6] = [
        Achievement::FirstReview,
        Achievement::TenItemsStarted,
        Achievement::FirstMastery,
        Achievement::WeekStreak,
        Achievement::MonthStreak,
        Achievement::HundredReviews,
    ];

    pub fn is_unlocked(self, m: &ProgressMetrics) -> bool {
        match self {
            Self::FirstReview => m.total_reviews >= 1,
            Self::TenItemsStarted => m.reviewed_items >= 10,
            Self::FirstMastery => m.mastered_items >= 1,
            Self::WeekStreak => m.longest_streak >= 7,
            Self::MonthStreak => m.longest_streak >= 30,
            Self::HundredReviews => m.total_reviews >= 100,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::FirstReview => "First review",
            Self::TenItemsStarted => "Ten items started",
            Self::FirstMastery => "First mastered item",
            Self::WeekStreak => "Seven-day streak",
            Self::MonthStreak => "Thirty-day streak",
            Self::HundredReviews => "One hundred reviews",
        }
    }
}

pub fn unlocked(metrics: &ProgressMetrics) -> Vec<Achievement> {
    Achievement::ALL
        .into_iter()
        .filter(|a| a.is_unlocked(metrics))
        .collect()
}
