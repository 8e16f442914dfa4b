//! Schedule evaluation: decides whether a persisted task is due.
//!
//! [`evaluate`] and [`next_run_after`] are pure. [`ScheduleEvaluator`] wraps
//! them for the polling loop, turning a broken schedule into "never due" and
//! warning about it once per task and expression.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use pacer_core::{Schedule, SchedulerError, Task, TaskId};

use crate::cron_parser::{parse_cron, validate_cron};

/// Whether `task` is due at `now`.
///
/// Errors only for schedules that can never fire (malformed cron, zero interval).
pub fn evaluate(task: &Task, now: DateTime<Utc>) -> Result<bool, SchedulerError> {
    match &task.schedule {
        Schedule::Cron { cron_expression } => {
            let schedule = parse_cron(cron_expression)?;
            let Some(last_run) = task.last_run_at else {
                return Ok(true);
            };
            Ok(schedule.previous(now).is_some_and(|fire| fire > last_run))
        }
        Schedule::Interval { interval_minutes } => {
            if *interval_minutes == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval_minutes must be positive".into(),
                ));
            }
            Ok(match task.last_run_at {
                None => true,
                Some(last_run) => now >= last_run + Duration::minutes(i64::from(*interval_minutes)),
            })
        }
        Schedule::OneTime { scheduled_time } => {
            Ok(task.last_run_at.is_none() && now >= *scheduled_time)
        }
    }
}

/// Projected next fire time after a completion at `now`. One-time schedules
/// are consumed and never have one.
pub fn next_run_after(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Cron { cron_expression } => parse_cron(cron_expression)
            .ok()
            .and_then(|s| s.next_after(now)),
        Schedule::Interval { interval_minutes } if *interval_minutes > 0 => {
            Some(now + Duration::minutes(i64::from(*interval_minutes)))
        }
        Schedule::Interval { .. } | Schedule::OneTime { .. } => None,
    }
}

/// Creation-time check used by the management surface.
pub fn validate_schedule(schedule: &Schedule) -> Result<(), SchedulerError> {
    match schedule {
        Schedule::Cron { cron_expression } => validate_cron(cron_expression).map(|_| ()),
        Schedule::Interval { interval_minutes: 0 } => Err(SchedulerError::InvalidSchedule(
            "interval_minutes must be positive".into(),
        )),
        Schedule::Interval { .. } | Schedule::OneTime { .. } => Ok(()),
    }
}

/// Loop-facing evaluator. Never propagates schedule errors.
#[derive(Default)]
pub struct ScheduleEvaluator {
    warned: Mutex<HashSet<(TaskId, String)>>,
}

impl ScheduleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_due(&self, task: &Task, now: DateTime<Utc>) -> bool {
        match evaluate(task, now) {
            Ok(due) => due,
            Err(e) => {
                self.warn_once(task, &e);
                false
            }
        }
    }

    fn warn_once(&self, task: &Task, error: &SchedulerError) {
        let key = (task.id, task.schedule.to_string());
        let first = match self.warned.lock() {
            Ok(mut warned) => warned.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };
        if first {
            warn!(
                task_id = %task.id,
                task = %task.name,
                schedule = %task.schedule,
                error = %error,
                "Task schedule cannot fire; treating as never due"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pacer_core::TaskType;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, h, m, 0).unwrap()
    }

    fn task(schedule: Schedule) -> Task {
        Task::new("t", TaskType::MeetingsImport, schedule)
    }

    #[test]
    fn one_time_fires_once() {
        let mut t = task(Schedule::OneTime { scheduled_time: at(9, 0) });
        assert!(!evaluate(&t, at(8, 59)).unwrap());
        assert!(evaluate(&t, at(9, 0)).unwrap());

        t.last_run_at = Some(at(9, 1));
        assert!(!evaluate(&t, at(9, 2)).unwrap());
        let far_future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(!evaluate(&t, far_future).unwrap());
    }

    #[test]
    fn interval_boundary() {
        let mut t = task(Schedule::Interval { interval_minutes: 30 });
        assert!(evaluate(&t, at(0, 0)).unwrap(), "never run means due");

        t.last_run_at = Some(at(10, 0));
        assert!(!evaluate(&t, at(10, 29)).unwrap());
        assert!(evaluate(&t, at(10, 30)).unwrap());
    }

    #[test]
    fn cron_daily_six_am() {
        let mut t = task(Schedule::Cron {
            cron_expression: "0 6 * * *".into(),
        });
        t.last_run_at = Some(Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap());
        assert!(!evaluate(&t, at(5, 59)).unwrap());
        assert!(evaluate(&t, at(6, 1)).unwrap());
    }

    #[test]
    fn cron_fire_exactly_at_now_counts() {
        let mut t = task(Schedule::Cron {
            cron_expression: "0 6 * * *".into(),
        });
        t.last_run_at = Some(Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 20).unwrap());
        assert!(evaluate(&t, at(6, 0)).unwrap());
    }

    #[test]
    fn cron_claimed_after_fire_is_not_due_again() {
        let mut t = task(Schedule::Cron {
            cron_expression: "0 6 * * *".into(),
        });
        // claim stamped a few seconds after the fire time
        t.last_run_at = Some(Utc.with_ymd_and_hms(2026, 10, 17, 6, 0, 3).unwrap());
        assert!(!evaluate(&t, at(6, 1)).unwrap());
        assert!(!evaluate(&t, at(23, 59)).unwrap());
    }

    #[test]
    fn cron_without_last_run_is_due() {
        let t = task(Schedule::Cron {
            cron_expression: "0 6 * * *".into(),
        });
        assert!(evaluate(&t, at(3, 0)).unwrap());
    }

    #[test]
    fn malformed_cron_is_never_due() {
        let evaluator = ScheduleEvaluator::new();
        let mut t = task(Schedule::Cron {
            cron_expression: "every tuesday".into(),
        });
        assert!(evaluate(&t, at(6, 0)).is_err());
        assert!(!evaluator.is_due(&t, at(6, 0)));
        t.last_run_at = Some(at(1, 0));
        assert!(!evaluator.is_due(&t, at(23, 0)));
        assert_eq!(evaluator.warned.lock().unwrap().len(), 1);
    }

    #[test]
    fn zero_interval_is_never_due() {
        let evaluator = ScheduleEvaluator::new();
        let t = task(Schedule::Interval { interval_minutes: 0 });
        assert!(!evaluator.is_due(&t, at(12, 0)));
        assert!(validate_schedule(&t.schedule).is_err());
    }

    #[test]
    fn next_run_projection() {
        let now = at(10, 15);
        let cron = Schedule::Cron {
            cron_expression: "0 6 * * *".into(),
        };
        assert_eq!(
            next_run_after(&cron, now),
            Some(Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 0).unwrap())
        );
        assert_eq!(
            next_run_after(&Schedule::Interval { interval_minutes: 45 }, now),
            Some(at(11, 0))
        );
        assert_eq!(
            next_run_after(&Schedule::OneTime { scheduled_time: now }, now),
            None
        );
    }

    #[test]
    fn cron_with_both_day_fields_fires_on_either() {
        let evaluator = ScheduleEvaluator::new();
        let mut t = task(Schedule::Cron {
            cron_expression: "0 0 1 * 1".into(),
        });
        t.last_run_at = Some(at(0, 0));
        // Monday 2026-10-19 00:01, not the 1st
        let monday = Utc.with_ymd_and_hms(2026, 10, 19, 0, 1, 0).unwrap();
        assert!(evaluator.is_due(&t, monday));
        assert!(!evaluator.is_due(&t, Utc.with_ymd_and_hms(2026, 10, 18, 23, 59, 0).unwrap()));
        assert_eq!(
            next_run_after(&t.schedule, monday),
            Some(Utc.with_ymd_and_hms(2026, 10, 26, 0, 0, 0).unwrap())
        );
    }
}
