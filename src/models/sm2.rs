//! SM-2 (SuperMemo 2) spaced repetition scheduling.
//!
//! The scheduler maps a recall-quality rating and an item's prior state to its
//! next state:
//! - Quality 0-2: the item failed. Repetitions reset and it is due again in a day
//! - Quality 3-5: the interval grows, 1 day → 6 days → previous interval × EF
//! - The easiness factor (EF) is adjusted after every review, pass or fail, and
//!   never falls below 1.3
//!
//! Scheduling is a pure function of its inputs; persisting the result is the
//! caller's job.

use super::review_record::{ItemStatus, MIN_EASE_FACTOR, ReviewRecord};
use crate::config::SchedulerConfig;
use crate::error::SchedulingError;
use chrono::{DateTime, Duration, SubsecRound, Utc};

pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Lowest quality that counts as a successful recall.
pub const PASSING_QUALITY: u8 = 3;

/// Longest interval the scheduler grows to (about a century).
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// A recall-quality rating in 0..=5 (0 = complete blackout, 5 = perfect response).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: i32) -> Result<Self, SchedulingError> {
        match u8::try_from(value) {
            Ok(q) if q <= 5 => Ok(Self(q)),
            _ => Err(SchedulingError::InvalidInput { quality: value }),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_pass(self) -> bool {
        self.0 >= PASSING_QUALITY
    }
}

impl TryFrom<i32> for Quality {
    type Error = SchedulingError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// EF' = EF + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02)), floored at 1.3.
pub fn next_ease_factor(ease_factor: f64, quality: Quality) -> f64 {
    let miss = 5.0 - quality.value() as f64;
    let ef = ease_factor + (0.1 - miss * (0.08 + miss * 0.02));
    ef.max(MIN_EASE_FACTOR)
}

/// Computes the state that follows `prior` after a review rated `quality` at `now`.
///
/// Fails only for ratings outside 0..=5.
pub fn schedule(
    quality: i32,
    prior: &ReviewRecord,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<ReviewRecord, SchedulingError> {
    let quality = Quality::new(quality)?;
    let now = now.trunc_subsecs(0);

    let (interval_days, repetition_count) = if quality.is_pass() {
        let interval = match prior.repetition_count {
            0 => 1,
            1 => 6,
            // Uses the ease factor from before this review.
            _ => {
                let grown = (prior.interval_days as f64 * prior.ease_factor).round();
                // An interval already past the cap (imported data) is kept, never shrunk.
                (grown.min(MAX_INTERVAL_DAYS as f64) as u32).max(prior.interval_days)
            }
        };
        (interval, prior.repetition_count.saturating_add(1))
    } else {
        (1, 0)
    };

    let status = if !quality.is_pass() {
        ItemStatus::Learning
    } else if repetition_count > config.mastery_threshold {
        ItemStatus::Mastered
    } else if repetition_count >= 2 {
        ItemStatus::Review
    } else {
        ItemStatus::Learning
    };

    let mut history = prior.history.clone();
    history.push(now);
    if history.windows(2).any(|w| w[0] > w[1]) {
        history.sort();
    }
    if history.len() > config.history_cap {
        let excess = history.len() - config.history_cap;
        history.drain(..excess);
    }

    Ok(ReviewRecord {
        item_id: prior.item_id.clone(),
        status,
        interval_days,
        repetition_count,
        ease_factor: next_ease_factor(prior.ease_factor, quality),
        next_review_at: due_after(now, interval_days),
        history,
    })
}

/// `now` plus `interval_days`, saturating at the latest representable time.
fn due_after(now: DateTime<Utc>, interval_days: u32) -> DateTime<Utc> {
    now.checked_add_signed(Duration::seconds(interval_days as i64 * SECONDS_PER_DAY))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap()
    }

    fn record(repetitions: u32, interval: u32, ease: f64, status: ItemStatus) -> ReviewRecord {
        ReviewRecord {
            item_id: "card".to_string(),
            status,
            interval_days: interval,
            repetition_count: repetitions,
            ease_factor: ease,
            next_review_at: now(),
            history: Vec::new(),
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    #[test]
    fn test_first_review() {
        let fresh = ReviewRecord::new("card", 2.5, now());
        let next = schedule(4, &fresh, now(), &config()).unwrap();

        assert_eq!(next.repetition_count, 1);
        assert_eq!(next.interval_days, 1);
        assert_eq!(next.status, ItemStatus::Learning);
        assert_eq!(next.next_review_at, now() + Duration::days(1));
        assert_eq!(next.history, vec![now()]);
    }

    #[test]
    fn test_second_review() {
        let fresh = ReviewRecord::new("card", 2.5, now());
        let first = schedule(4, &fresh, now(), &config()).unwrap();
        let second = schedule(5, &first, now() + Duration::days(1), &config()).unwrap();

        assert_eq!(second.repetition_count, 2);
        assert_eq!(second.interval_days, 6);
        assert_eq!(second.status, ItemStatus::Review);
    }

    #[test]
    fn test_third_review_multiplies_by_prior_ease() {
        let prior = record(2, 6, 2.5, ItemStatus::Review);
        let next = schedule(5, &prior, now(), &config()).unwrap();

        assert_eq!(next.interval_days, 15);
        assert_eq!(next.repetition_count, 3);
        assert!((next.ease_factor - 2.6).abs() < 1e-9);
    }

    #[test]
    fn test_failure_resets() {
        let prior = record(3, 15, 2.5, ItemStatus::Review);
        let next = schedule(1, &prior, now(), &config()).unwrap();

        assert_eq!(next.repetition_count, 0);
        assert_eq!(next.interval_days, 1);
        assert_eq!(next.status, ItemStatus::Learning);
        assert!(next.ease_factor < 2.5);
    }

    #[test]
    fn test_failure_demotes_mastered() {
        let prior = record(12, 200, 2.8, ItemStatus::Mastered);
        let next = schedule(0, &prior, now(), &config()).unwrap();
        assert_eq!(next.status, ItemStatus::Learning);
    }

    #[test]
    fn test_mastery_after_threshold() {
        let config = config();
        let at_threshold = record(config.mastery_threshold - 1, 100, 2.5, ItemStatus::Review);
        let next = schedule(5, &at_threshold, now(), &config).unwrap();
        assert_eq!(next.repetition_count, config.mastery_threshold);
        assert_eq!(next.status, ItemStatus::Review);

        let beyond = schedule(5, &next, now(), &config).unwrap();
        assert_eq!(beyond.status, ItemStatus::Mastered);
    }

    #[test]
    fn test_first_review_failure_moves_to_learning() {
        let fresh = ReviewRecord::new("card", 2.5, now());
        let next = schedule(2, &fresh, now(), &config()).unwrap();
        assert_eq!(next.status, ItemStatus::Learning);
        assert_eq!(next.repetition_count, 0);
    }

    #[test]
    fn test_out_of_range_quality() {
        let fresh = ReviewRecord::new("card", 2.5, now());
        assert_eq!(
            schedule(6, &fresh, now(), &config()),
            Err(SchedulingError::InvalidInput { quality: 6 })
        );
        assert_eq!(
            schedule(-1, &fresh, now(), &config()),
            Err(SchedulingError::InvalidInput { quality: -1 })
        );
    }

    #[test]
    fn test_ef_floor() {
        let prior = record(1, 1, 1.3, ItemStatus::Learning);
        let next = schedule(0, &prior, now(), &config()).unwrap();
        assert_eq!(next.ease_factor, MIN_EASE_FACTOR);
    }

    #[test]
    fn test_ease_boundary_quality_four_is_neutral() {
        let ef = next_ease_factor(2.5, Quality::new(4).unwrap());
        assert!((ef - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_ease_boundary_quality_three_decreases() {
        let ef = next_ease_factor(2.5, Quality::new(3).unwrap());
        assert!((ef - 2.36).abs() < 1e-9);

        // Quality 3 is a pass but still lowers the ease down to the floor.
        let floored = next_ease_factor(1.4, Quality::new(3).unwrap());
        assert_eq!(floored, MIN_EASE_FACTOR);
    }

    #[test]
    fn test_history_is_capped() {
        let config = SchedulerConfig {
            history_cap: 3,
            ..SchedulerConfig::default()
        };
        let mut current = ReviewRecord::new("card", 2.5, now());
        for day in 0..5 {
            current = schedule(5, &current, now() + Duration::days(day), &config).unwrap();
        }
        assert_eq!(current.history.len(), 3);
        assert_eq!(current.history[0], now() + Duration::days(2));
        assert_eq!(current.history[2], now() + Duration::days(4));
    }

    #[test]
    fn test_subsecond_time_is_truncated() {
        let fresh = ReviewRecord::new("card", 2.5, now());
        let precise = now() + Duration::milliseconds(750);
        let next = schedule(4, &fresh, precise, &config()).unwrap();
        assert_eq!(next.history[0], now());
    }

    #[test]
    fn test_long_run_of_perfect_reviews_stays_capped() {
        let mut current = ReviewRecord::new("card", 2.5, now());
        for _ in 0..50 {
            current = schedule(5, &current, now(), &config()).unwrap();
        }
        assert_eq!(current.interval_days, MAX_INTERVAL_DAYS);
        assert_eq!(current.repetition_count, 50);
        let expected = now() + Duration::days(MAX_INTERVAL_DAYS as i64);
        assert_eq!(current.next_review_at, expected);
    }

    #[test]
    fn test_due_date_saturates_near_end_of_time() {
        let late = DateTime::<Utc>::MAX_UTC - Duration::days(10);
        let prior = record(5, 1000, 2.5, ItemStatus::Review);
        let next = schedule(5, &prior, late, &config()).unwrap();
        assert_eq!(next.next_review_at, DateTime::<Utc>::MAX_UTC.trunc_subsecs(0));
    }

    fn arb_record() -> impl Strategy<Value = ReviewRecord> {
        (0u32..20, 0u32..400, 1.3f64..3.5).prop_map(|(reps, interval, ease)| {
            record(reps, interval, ease, ItemStatus::Review)
        })
    }

    proptest! {
        #[test]
        fn prop_success_increments_and_never_shrinks(prior in arb_record(), q in 3i32..=5) {
            let next = schedule(q, &prior, now(), &config()).unwrap();
            prop_assert_eq!(next.repetition_count, prior.repetition_count + 1);
            if prior.repetition_count >= 2 {
                prop_assert!(next.interval_days >= prior.interval_days);
            }
        }

        #[test]
        fn prop_failure_resets(prior in arb_record(), q in 0i32..=2) {
            let next = schedule(q, &prior, now(), &config()).unwrap();
            prop_assert_eq!(next.repetition_count, 0);
            prop_assert_eq!(next.interval_days, 1);
            prop_assert_eq!(next.status, ItemStatus::Learning);
        }

        #[test]
        fn prop_ease_never_below_floor(qualities in proptest::collection::vec(0i32..=5, 1..40)) {
            let mut current = ReviewRecord::new("card", 2.5, now());
            for q in qualities {
                current = schedule(q, &current, now(), &config()).unwrap();
                prop_assert!(current.ease_factor >= MIN_EASE_FACTOR);
            }
        }

        #[test]
        fn prop_perfect_recall_never_lowers_ease(steps in 1usize..30, start in 1.3f64..3.0) {
            let mut current = record(0, 0, start, ItemStatus::New);
            for _ in 0..steps {
                let next = schedule(5, &current, now(), &config()).unwrap();
                prop_assert!(next.ease_factor >= current.ease_factor);
                current = next;
            }
        }

        #[test]
        fn prop_boundary_qualities_stay_consistent(ease in 1.3f64..4.0) {
            let three = next_ease_factor(ease, Quality::new(3).unwrap());
            let four = next_ease_factor(ease, Quality::new(4).unwrap());
            prop_assert!(three <= four);
            prop_assert!(three >= MIN_EASE_FACTOR);
            prop_assert!((four - ease).abs() < 1e-9);
        }

        #[test]
        fn prop_huge_intervals_never_panic(
            reps in 2u32..100,
            interval in 0u32..=u32::MAX,
            ease in 1.3f64..10.0,
            q in 0i32..=5,
        ) {
            let prior = record(reps, interval, ease, ItemStatus::Review);
            let next = schedule(q, &prior, now(), &config()).unwrap();
            prop_assert!(next.interval_days <= MAX_INTERVAL_DAYS.max(interval));
            prop_assert!(next.next_review_at >= now());
        }

        #[test]
        fn prop_next_review_follows_interval(prior in arb_record(), q in 0i32..=5) {
            let next = schedule(q, &prior, now(), &config()).unwrap();
            let expected = now() + Duration::seconds(next.interval_days as i64 * SECONDS_PER_DAY);
            prop_assert_eq!(next.next_review_at, expected);
        }
    }
}
