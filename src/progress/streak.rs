//! Streak/Lapse tracking derived from review timestamps.
//!
//! A streak is the number of consecutive calendar days, ending today or
//! yesterday, with at least one review. A freeze is a single-use token that
//! covers exactly one missed day.

use crate::database::{AppState, RecordStore};
use crate::error::StorageError;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;

fn practice_days<Tz: TimeZone>(history: &[DateTime<Utc>], tz: &Tz) -> BTreeSet<NaiveDate> {
    history
        .iter()
        .map(|ts| ts.with_timezone(tz).date_naive())
        .collect()
}

fn streak_ending(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let yesterday = today - Duration::days(1);
    let mut check = if days.contains(&today) {
        today
    } else if days.contains(&yesterday) {
        yesterday
    } else {
        return 0;
    };

    let mut streak = 0;
    while days.contains(&check) {
        streak += 1;
        check -= Duration::days(1);
    }
    streak
}

/// Consecutive practice days ending today or yesterday, in `now`'s time zone.
pub fn compute_streak<Tz: TimeZone>(history: &[DateTime<Utc>], now: &DateTime<Tz>) -> u32 {
    let days = practice_days(history, &now.timezone());
    streak_ending(&days, now.date_naive())
}

/// Like [`compute_streak`], counting each frozen day as practiced.
pub fn compute_streak_with_freezes<Tz: TimeZone>(
    history: &[DateTime<Utc>],
    frozen_days: &[NaiveDate],
    now: &DateTime<Tz>,
) -> u32 {
    let mut days = practice_days(history, &now.timezone());
    days.extend(frozen_days.iter().copied());
    streak_ending(&days, now.date_naive())
}

/// Longest run of consecutive practice days anywhere in `history`.
pub fn longest_streak<Tz: TimeZone>(history: &[DateTime<Utc>], tz: &Tz) -> u32 {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;

    for day in practice_days(history, tz) {
        current = match previous {
            Some(prev) if day - prev == Duration::days(1) => current + 1,
            _ => 1,
        };
        longest = longest.max(current);
        previous = Some(day);
    }
    longest
}

/// True when strictly more than one and strictly less than two days have passed
/// since `last_practice` and a freeze is available.
pub fn can_use_freeze(
    last_practice: DateTime<Utc>,
    freeze_inventory: u32,
    now: DateTime<Utc>,
) -> bool {
    let elapsed = now - last_practice;
    freeze_inventory > 0 && elapsed > Duration::days(1) && elapsed < Duration::days(2)
}

/// Reads review timestamps from the record store on demand and keeps freeze
/// state in the app state table. Day boundaries are UTC.
#[derive(Clone)]
pub struct StreakTracker {
    records: RecordStore,
    state: AppState,
}

impl StreakTracker {
    pub fn new(records: RecordStore, state: AppState) -> Self {
        Self { records, state }
    }

    pub fn current_streak(&self, now: DateTime<Utc>) -> Result<u32, StorageError> {
        let history = self.records.review_timestamps()?;
        let frozen = self.state.frozen_days()?;
        Ok(compute_streak_with_freezes(&history, &frozen, &now))
    }

    pub fn longest_streak(&self) -> Result<u32, StorageError> {
        let mut history = self.records.review_timestamps()?;
        let frozen = self.state.frozen_days()?;
        // Frozen days count toward the longest run as well.
        history.extend(
            frozen
                .iter()
                .filter_map(|day| day.and_hms_opt(12, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt)),
        );
        Ok(longest_streak(&history, &Utc))
    }

    pub fn last_practice(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.records.review_timestamps()?.last().copied())
    }

    pub fn freeze_inventory(&self) -> Result<u32, StorageError> {
        self.state.freeze_inventory()
    }

    /// Adds `count` freezes to the inventory.
    pub fn grant_freezes(&self, count: u32) -> Result<u32, StorageError> {
        let total = self.state.freeze_inventory()?.saturating_add(count);
        self.state.set_freeze_inventory(total)?;
        Ok(total)
    }

    /// Spends a freeze on the day after the last practice when
    /// [`can_use_freeze`] allows it and that day is over. Returns whether a
    /// freeze was spent.
    pub fn try_use_freeze(&self, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let Some(last) = self.last_practice()? else {
            return Ok(false);
        };
        if !can_use_freeze(last, self.state.freeze_inventory()?, now) {
            return Ok(false);
        }
        // `last` is the newest review, so the day after it has no practice.
        let missed = last.date_naive() + Duration::days(1);
        if missed >= now.date_naive() {
            return Ok(false);
        }
        let spent = self.state.spend_freeze(missed)?;
        if spent {
            tracing::info!(%missed, "streak freeze spent");
        }
        Ok(spent)
    }
}
