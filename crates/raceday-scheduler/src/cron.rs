//! Lightweight cron expressions.
//!
//! 5-field form: "MIN HOUR DOM MON DOW". Fields accept `*`, `*/N`, single
//! values, comma lists, and `A-B` ranges. Interval schedules are the primary
//! mode; cron is the optional second kind with the same contractual
//! guarantees, so a small scanner is enough — no cron crate dependency.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use raceday_core::error::{RacedayError, Result};

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

impl CronExpr {
    /// Parse a 5-field expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(RacedayError::Config(format!(
                "invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }

        Ok(Self {
            minutes: parse_field(parts[0], 0, 59)
                .ok_or_else(|| field_error(expression, "minute", parts[0]))?,
            hours: parse_field(parts[1], 0, 23)
                .ok_or_else(|| field_error(expression, "hour", parts[1]))?,
            days_of_month: parse_field(parts[2], 1, 31)
                .ok_or_else(|| field_error(expression, "day-of-month", parts[2]))?,
            months: parse_field(parts[3], 1, 12)
                .ok_or_else(|| field_error(expression, "month", parts[3]))?,
            days_of_week: parse_field(parts[4], 0, 6)
                .ok_or_else(|| field_error(expression, "day-of-week", parts[4]))?,
        })
    }

    /// Compute the next matching time strictly after `after`.
    ///
    /// Scans at minute resolution; bounded at 366 days so a contradictory
    /// expression (e.g. Feb 31) terminates instead of spinning.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(after);

        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days_of_month.contains(&t.day())
            && self.months.contains(&t.month())
            && self
                .days_of_week
                .contains(&t.weekday().num_days_from_sunday())
    }
}

fn field_error(expression: &str, field: &str, value: &str) -> RacedayError {
    RacedayError::Config(format!(
        "invalid cron expression '{expression}': bad {field} field '{value}'"
    ))
}

/// Parse one cron field into the sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma list; each entry is a single value or an A-B range.
    let mut values = Vec::new();
    for entry in field.split(',') {
        let entry = entry.trim();
        if let Some((a, b)) = entry.split_once('-') {
            let a: u32 = a.parse().ok()?;
            let b: u32 = b.parse().ok()?;
            if a > b || a < min || b > max {
                return None;
            }
            values.extend(a..=b);
        } else {
            let n: u32 = entry.parse().ok()?;
            if n < min || n > max {
                return None;
            }
            values.push(n);
        }
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() { None } else { Some(values) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_every_hour() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 10, 30, 0).unwrap();
        let next = expr.next_after(after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_daily_at_eight() {
        let expr = CronExpr::parse("0 8 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let next = expr.next_after(after).unwrap();
        assert_eq!(next.day(), 11);
        assert_eq!(next.hour(), 8);
    }

    #[test]
    fn test_step_minutes() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 10, 2, 0).unwrap();
        assert_eq!(expr.next_after(after).unwrap().minute(), 15);
    }

    #[test]
    fn test_range_and_list() {
        let expr = CronExpr::parse("0,30 9-17 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 17, 45, 0).unwrap();
        let next = expr.next_after(after).unwrap();
        // Past the working window: next match is tomorrow 09:00.
        assert_eq!(next.day(), 11);
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_day_of_week() {
        // Sundays at noon. 2026-03-10 is a Tuesday.
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let next = expr.next_after(after).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
        assert_eq!(next.hour(), 12);
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronExpr::parse("bad").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("9-5 * * * *").is_err());
        assert!(CronExpr::parse("* * * *").is_err());
    }
}
