/// Cron expression validation and normalization.
///
/// Accepts 5-field (min hour dom mon dow), 6-field (sec …) and 7-field
/// (sec … year) syntax and turns it into what the `cron` crate expects:
/// a leading seconds field, and day-of-week names instead of numbers, since
/// the crate counts weekdays from 1 = Sunday while classic cron uses 0/7.
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use cron::Schedule;

use pacer_core::SchedulerError;

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

const DOM: usize = 3;
const DOW: usize = 5;

/// A parsed cron expression.
///
/// With both day-of-month and day-of-week restricted, classic cron fires when
/// either matches, while the `cron` crate requires both. Such expressions are
/// held as two schedules, one per day field, and their fire times merged.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Latest fire time at or before `now`.
    pub fn previous(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // start one second past `now` so a fire time landing exactly on it is found
        let start = now.trunc_subsecs(0) + Duration::seconds(1);
        self.schedules
            .iter()
            .filter_map(|s| s.after(&start).rev().find(|fire| *fire <= now))
            .max()
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }

    /// The next `count` fire times strictly after `after`, in order.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times: Vec<DateTime<Utc>> = self
            .schedules
            .iter()
            .flat_map(|s| s.after(&after).take(count))
            .collect();
        times.sort();
        times.dedup();
        times.truncate(count);
        times
    }
}

/// Normalize and parse an expression.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, SchedulerError> {
    let fields = normalize(expr)?;
    let variants = if is_restricted(&fields[DOM]) && is_restricted(&fields[DOW]) {
        let mut by_dom = fields.clone();
        by_dom[DOW] = "*".to_string();
        let mut by_dow = fields;
        by_dow[DOM] = "*".to_string();
        vec![by_dom, by_dow]
    } else {
        vec![fields]
    };

    let schedules = variants
        .iter()
        .map(|f| Schedule::from_str(&f.join(" ")).map_err(|e| invalid(expr, e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CronSchedule { schedules })
}

/// Validate an expression, returning its normalized form.
pub fn validate_cron(expr: &str) -> Result<String, SchedulerError> {
    parse_cron(expr)?;
    Ok(normalize(expr)?.join(" "))
}

/// The next `count` fire times strictly after `after`.
pub fn upcoming(
    expr: &str,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
    Ok(parse_cron(expr)?.upcoming(after, count))
}

fn is_restricted(field: &str) -> bool {
    !matches!(field, "*" | "?")
}

fn normalize(expr: &str) -> Result<Vec<String>, SchedulerError> {
    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 | 7 => {}
        n => {
            return Err(invalid(
                expr,
                format!("expected 5, 6 or 7 fields, got {n}"),
            ))
        }
    }
    fields[DOW] = weekday_field(&fields[DOW]).map_err(|reason| invalid(expr, reason))?;
    Ok(fields)
}

/// Rewrite numeric weekday tokens (0–7, Sunday = 0 or 7) as names.
fn weekday_field(field: &str) -> Result<String, String> {
    let parts: Result<Vec<String>, String> = field.split(',').map(weekday_part).collect();
    Ok(parts?.join(","))
}

fn weekday_part(part: &str) -> Result<String, String> {
    let (range, step) = match part.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (part, None),
    };

    let translated = match range.split_once('-') {
        Some((lo, hi)) => match (weekday_number(lo)?, weekday_number(hi)?) {
            (Some(lo), Some(hi)) if lo > hi => {
                return Err(format!("weekday range {lo}-{hi} is reversed"));
            }
            // "1-7" means Monday through Sunday; the cron crate cannot wrap past Saturday.
            (Some(lo), Some(7)) if lo > 0 && step.is_none() => {
                if lo == 7 {
                    WEEKDAYS[0].to_string()
                } else {
                    format!("{}-Sat,Sun", WEEKDAYS[lo as usize])
                }
            }
            (Some(0), Some(7)) => "*".to_string(),
            (lo_num, hi_num) => format!(
                "{}-{}",
                lo_num.map_or(lo.to_string(), |n| WEEKDAYS[(n % 7) as usize].to_string()),
                hi_num.map_or(hi.to_string(), |n| WEEKDAYS[(n % 7) as usize].to_string()),
            ),
        },
        None => match weekday_number(range)? {
            Some(n) => WEEKDAYS[(n % 7) as usize].to_string(),
            None => range.to_string(),
        },
    };

    Ok(match step {
        Some(step) => format!("{translated}/{step}"),
        None => translated,
    })
}

/// `Ok(None)` for non-numeric tokens (`*`, `?`, names) which pass through.
fn weekday_number(token: &str) -> Result<Option<u32>, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let n: u32 = token
        .parse()
        .map_err(|_| format!("'{token}' not numeric"))?;
    if n > 7 {
        return Err(format!("weekday {n} out of [0, 7]"));
    }
    Ok(Some(n))
}

fn invalid(expr: &str, reason: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidCron {
        expression: expr.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn five_field_gets_seconds_prefix() {
        assert_eq!(validate_cron("*/30 * * * *").unwrap(), "0 */30 * * * *");
    }

    #[test]
    fn six_field_passes_through() {
        assert_eq!(validate_cron("0 0 6 * * *").unwrap(), "0 0 6 * * *");
    }

    #[test]
    fn numeric_weekdays_become_names() {
        assert_eq!(validate_cron("0 0 * * 0").unwrap(), "0 0 0 * * Sun");
        assert_eq!(validate_cron("0 9 * * 1-5").unwrap(), "0 0 9 * * Mon-Fri");
        assert_eq!(validate_cron("0 9 * * 1-7").unwrap(), "0 0 9 * * Mon-Sat,Sun");
        assert_eq!(validate_cron("0 9 * * 1,3,5").unwrap(), "0 0 9 * * Mon,Wed,Fri");
    }

    #[test]
    fn sunday_zero_fires_on_sunday() {
        // 2026-10-17 is a Saturday
        let after = Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap();
        let next = upcoming("0 0 * * 0", after, 1).unwrap();
        assert_eq!(next[0].weekday(), Weekday::Sun);
        assert_eq!(next[0].hour(), 0);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = validate_cron("* * *").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(validate_cron("61 * * * *").is_err());
        assert!(validate_cron("0 0 * * 9").is_err());
        assert!(validate_cron("not a cron at all").is_err());
    }

    #[test]
    fn upcoming_returns_requested_count() {
        let after = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        let times = upcoming("0 */6 * * *", after, 3).unwrap();
        let hours: Vec<u32> = times.iter().map(|t| t.hour()).collect();
        assert_eq!(hours, vec![6, 12, 18]);
    }

    #[test]
    fn day_of_month_or_day_of_week() {
        let after = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        let times = upcoming("0 0 1 * 1", after, 4).unwrap();
        let expected: Vec<DateTime<Utc>> = [(10, 19), (10, 26), (11, 1), (11, 2)]
            .into_iter()
            .map(|(m, d)| Utc.with_ymd_and_hms(2026, m, d, 0, 0, 0).unwrap())
            .collect();
        assert_eq!(times, expected);

        let schedule = parse_cron("0 0 1 * 1").unwrap();
        assert_eq!(schedule.next_after(after), Some(expected[0]));
        let sunday_first = Utc.with_ymd_and_hms(2026, 11, 1, 12, 0, 0).unwrap();
        assert_eq!(schedule.previous(sunday_first), Some(expected[2]));
    }

    #[test]
    fn single_day_restriction_keeps_one_schedule() {
        let after = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        let times = upcoming("0 0 * * 1", after, 2).unwrap();
        assert!(times.iter().all(|t| t.weekday() == Weekday::Mon));
        assert_eq!(parse_cron("0 0 1 * *").unwrap().schedules.len(), 1);
    }
}
