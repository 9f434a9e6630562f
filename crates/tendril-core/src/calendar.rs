//! Next-run arithmetic and completion streak rules.
//!
//! Everything here is pure: no I/O, no clock reads. Callers pass the anchor
//! instant explicitly so results are deterministic.

use chrono::{DateTime, Days, Duration as ChronoDuration, Months, NaiveDate, Utc};
use serde::Deserialize;

use crate::error::{ScheduleError, ScheduleResult};
use crate::time::PreferredTime;
use crate::types::{Frequency, MaintenanceTask};

/// Hours between the two slots of a twice-daily task.
pub const TWICE_DAILY_OFFSET_HOURS: i64 = 12;

/// Upper bound on missed occurrences counted for a single completion.
const MAX_COUNTED_MISSES: u32 = 10_000;

/// How a late completion is anchored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedOccurrencePolicy {
    /// Anchor at the completion time; missed occurrences are skipped.
    #[default]
    SkipToNext,
    /// Anchor at the slot that was just completed, so every missed
    /// occurrence comes due in turn. The next run may already be past.
    CatchUp,
}

/// Window around a scheduled slot within which completion counts as on time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceWindow {
    pub before: ChronoDuration,
    pub after: ChronoDuration,
}

impl GraceWindow {
    pub fn new(before: ChronoDuration, after: ChronoDuration) -> Self {
        Self { before, after }
    }

    /// Whether `completed_at` falls in `[scheduled - before, scheduled + after]`.
    pub fn contains(&self, scheduled: DateTime<Utc>, completed_at: DateTime<Utc>) -> bool {
        completed_at >= scheduled - self.before && completed_at <= scheduled + self.after
    }
}

impl Default for GraceWindow {
    fn default() -> Self {
        Self {
            before: ChronoDuration::hours(3),
            after: ChronoDuration::hours(3),
        }
    }
}

/// Result of judging a completion against its scheduled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// Completed within the grace window.
    pub on_time: bool,
    /// Slots whose grace window had fully closed when the task was completed.
    pub missed_occurrences: u32,
    /// Streak after applying this completion.
    pub streak: u32,
}

/// The derived fields produced by a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPlan {
    pub next_run: DateTime<Utc>,
    pub outcome: CompletionOutcome,
}

/// Computes next-run times and streak updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleCalculator {
    grace: GraceWindow,
    policy: MissedOccurrencePolicy,
}

impl ScheduleCalculator {
    /// Create a calculator with the given grace window and late-completion policy.
    pub fn new(grace: GraceWindow, policy: MissedOccurrencePolicy) -> Self {
        Self { grace, policy }
    }

    pub fn grace(&self) -> GraceWindow {
        self.grace
    }

    pub fn policy(&self) -> MissedOccurrencePolicy {
        self.policy
    }

    /// Reject preferred times outside the daylight window.
    pub fn validate_preferred_time(preferred: PreferredTime) -> ScheduleResult<()> {
        preferred.ensure_daylight()
    }

    /// Compute the next run strictly after `anchor`.
    ///
    /// - `Daily`: the day after the anchor's date, at `preferred`.
    /// - `TwiceDaily`: the nearest of `preferred` / `preferred + 12h` after the anchor.
    /// - `Weekly` / `BiWeekly`: anchor date + 7 / 14 days, at `preferred`.
    /// - `Monthly`: anchor date + one calendar month (clamped), at `preferred`.
    /// - `Custom(n)`: anchor + `n` days exactly.
    pub fn compute_next_run(
        frequency: Frequency,
        preferred: PreferredTime,
        anchor: DateTime<Utc>,
    ) -> ScheduleResult<DateTime<Utc>> {
        let date = anchor.date_naive();

        match frequency {
            Frequency::Daily => at_time(add_days(date, 1)?, preferred),
            Frequency::TwiceDaily => next_twice_daily_slot(preferred, anchor),
            Frequency::Weekly => at_time(add_days(date, 7)?, preferred),
            Frequency::BiWeekly => at_time(add_days(date, 14)?, preferred),
            Frequency::Monthly => {
                let next = date
                    .checked_add_months(Months::new(1))
                    .ok_or_else(overflow)?;
                at_time(next, preferred)
            }
            Frequency::Custom(days) => {
                if days == 0 {
                    return Err(ScheduleError::validation("custom frequency of zero days"));
                }
                anchor
                    .checked_add_days(Days::new(u64::from(days)))
                    .ok_or_else(overflow)
            }
        }
    }

    /// Judge a completion against the slot it fulfils.
    pub fn evaluate_completion(
        &self,
        frequency: Frequency,
        preferred: PreferredTime,
        scheduled: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        current_streak: u32,
    ) -> CompletionOutcome {
        let on_time = self.grace.contains(scheduled, completed_at);
        let missed_occurrences = if on_time {
            0
        } else {
            self.count_missed(frequency, preferred, scheduled, completed_at)
        };
        let streak = if on_time {
            current_streak.saturating_add(1)
        } else {
            0
        };

        CompletionOutcome {
            on_time,
            missed_occurrences,
            streak,
        }
    }

    /// Derive the next run and streak for `task` completed at `completed_at`.
    pub fn plan_completion(
        &self,
        task: &MaintenanceTask,
        completed_at: DateTime<Utc>,
    ) -> ScheduleResult<CompletionPlan> {
        let outcome = self.evaluate_completion(
            task.frequency,
            task.preferred_time,
            task.next_scheduled_time,
            completed_at,
            task.completion_streak,
        );

        let anchor = match self.policy {
            MissedOccurrencePolicy::SkipToNext => completed_at,
            MissedOccurrencePolicy::CatchUp => task.next_scheduled_time.min(completed_at),
        };
        let next_run = Self::compute_next_run(task.frequency, task.preferred_time, anchor)?;

        Ok(CompletionPlan { next_run, outcome })
    }

    fn count_missed(
        &self,
        frequency: Frequency,
        preferred: PreferredTime,
        scheduled: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> u32 {
        // Early completions miss nothing.
        if completed_at < scheduled {
            return 0;
        }

        let mut missed = 0;
        let mut slot = scheduled;
        while slot + self.grace.after < completed_at && missed < MAX_COUNTED_MISSES {
            missed += 1;
            slot = match Self::compute_next_run(frequency, preferred, slot) {
                Ok(next) => next,
                Err(_) => break,
            };
        }
        missed
    }
}

fn next_twice_daily_slot(
    preferred: PreferredTime,
    anchor: DateTime<Utc>,
) -> ScheduleResult<DateTime<Utc>> {
    let date = anchor.date_naive();
    let second = ChronoDuration::hours(TWICE_DAILY_OFFSET_HOURS);

    // The second slot of the previous day can land after midnight, so look one
    // day back as well as forward.
    let start = date.checked_sub_days(Days::new(1)).ok_or_else(overflow)?;
    let mut best: Option<DateTime<Utc>> = None;
    for offset in 0..=3 {
        let day = add_days(start, offset)?;
        let first = at_time(day, preferred)?;
        for candidate in [first, first + second] {
            if candidate > anchor && best.map_or(true, |b| candidate < b) {
                best = Some(candidate);
            }
        }
    }
    best.ok_or_else(overflow)
}

fn add_days(date: NaiveDate, days: u64) -> ScheduleResult<NaiveDate> {
    date.checked_add_days(Days::new(days)).ok_or_else(overflow)
}

fn at_time(date: NaiveDate, preferred: PreferredTime) -> ScheduleResult<DateTime<Utc>> {
    Ok(date.and_time(preferred.time()).and_utc())
}

fn overflow() -> ScheduleError {
    ScheduleError::validation("schedule falls outside the supported calendar range")
}
