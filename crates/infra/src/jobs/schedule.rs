//! Schedule expressions.
//!
//! Accepts the traditional 5-field cron form (`min hour dom month dow`) and a
//! 6-field form with a leading seconds field. Both are normalised into the
//! seconds-first dialect of the `cron` crate before parsing.

use core::str::FromStr;

use chrono::{DateTime, Utc};

/// Parse failure for a schedule expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule expression is empty")]
    Empty,
    #[error("schedule expression '{expr}' has {found} fields (expected 5 or 6)")]
    FieldCount { expr: String, found: usize },
    #[error("schedule expression '{expr}': invalid day-of-week '{token}'")]
    DayOfWeek { expr: String, token: String },
    #[error("invalid schedule expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

/// A validated schedule.
#[derive(Debug, Clone)]
pub struct ScheduleExpr {
    source: String,
    schedule: cron::Schedule,
}

impl ScheduleExpr {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let mut normalized: Vec<String> = match fields.len() {
            5 => std::iter::once("0")
                .chain(fields.iter().copied())
                .map(str::to_string)
                .collect(),
            6 => fields.iter().map(|f| f.to_string()).collect(),
            found => {
                return Err(ScheduleError::FieldCount {
                    expr: expr.to_string(),
                    found,
                });
            }
        };

        let dow = normalized.len() - 1;
        normalized[dow] = normalize_day_of_week(&normalized[dow]).map_err(|token| {
            ScheduleError::DayOfWeek {
                expr: expr.to_string(),
                token,
            }
        })?;

        let schedule =
            cron::Schedule::from_str(&normalized.join(" ")).map_err(|e| ScheduleError::Invalid {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: expr.trim().to_string(),
            schedule,
        })
    }

    /// The expression as configured (not the normalised form).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl FromStr for ScheduleExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validate without keeping the parsed schedule.
pub fn validate(expr: &str) -> Result<(), ScheduleError> {
    ScheduleExpr::parse(expr).map(|_| ())
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite Unix numeric weekdays (0-7, Sunday = 0 or 7) as names.
///
/// The `cron` crate numbers weekdays 1-7 starting on Sunday, so numeric values
/// cannot be passed through unchanged. Names, `*` and `?` are left alone.
/// Returns the offending token on failure.
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        let mapped = match range.split_once('-') {
            Some((start, end)) => {
                let start_day = day_number(start).map_err(|_| part.to_string())?;
                let end_day = day_number(end).map_err(|_| part.to_string())?;
                match (start_day, end_day) {
                    (Some(0), Some(7)) => "SUN-SAT".to_string(),
                    (Some(s), Some(7)) if step.is_none() && s > 0 => {
                        format!("{}-SAT,SUN", DAY_NAMES[s as usize])
                    }
                    (Some(_), Some(7)) => return Err(part.to_string()),
                    (s, e) => {
                        let start: &str = match s {
                            Some(n) => day_name(n),
                            None => start,
                        };
                        let end: &str = match e {
                            Some(n) => day_name(n),
                            None => end,
                        };
                        format!("{start}-{end}")
                    }
                }
            }
            None => match day_number(range).map_err(|_| part.to_string())? {
                Some(n) => day_name(n).to_string(),
                None => range.to_string(),
            },
        };

        match step {
            Some(step) => parts.push(format!("{mapped}/{step}")),
            None => parts.push(mapped),
        }
    }

    Ok(parts.join(","))
}

/// `Ok(Some(n))` for a numeric weekday, `Ok(None)` for anything non-numeric.
fn day_number(token: &str) -> Result<Option<u8>, ()> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<u8>() {
        Ok(n) if n <= 7 => Ok(Some(n)),
        _ => Err(()),
    }
}

fn day_name(n: u8) -> &'static str {
    DAY_NAMES[(n % 7) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_field_form_fires_on_the_minute() {
        let s = ScheduleExpr::parse("*/10 * * * *").unwrap();
        let next = s.next_after(at(2024, 3, 4, 12, 3, 17)).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (12, 10, 0));
    }

    #[test]
    fn six_field_form_carries_seconds() {
        let s = ScheduleExpr::parse("*/15 * * * * *").unwrap();
        let next = s.next_after(at(2024, 3, 4, 12, 3, 17)).unwrap();
        assert_eq!((next.minute(), next.second()), (3, 30));
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert_eq!(ScheduleExpr::parse("   ").unwrap_err(), ScheduleError::Empty);
        assert!(matches!(
            ScheduleExpr::parse("* * * *"),
            Err(ScheduleError::FieldCount { found: 4, .. })
        ));
        assert!(matches!(
            ScheduleExpr::parse("0 0 * * * * 2030"),
            Err(ScheduleError::FieldCount { found: 7, .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            ScheduleExpr::parse("61 * * * *"),
            Err(ScheduleError::Invalid { .. })
        ));
        assert!(validate("every ten minutes please ok").is_err());
    }

    #[test]
    fn unix_sunday_zero_is_sunday() {
        // 2024-03-04 is a Monday.
        let s = ScheduleExpr::parse("0 9 * * 0").unwrap();
        let next = s.next_after(at(2024, 3, 4, 0, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 9);

        let seven = ScheduleExpr::parse("0 9 * * 7").unwrap();
        assert_eq!(seven.next_after(at(2024, 3, 4, 0, 0, 0)), Some(next));
    }

    #[test]
    fn weekday_ranges_follow_unix_numbering() {
        let s = ScheduleExpr::parse("0 9 * * 1-5").unwrap();
        // Saturday morning -> next Monday.
        let next = s.next_after(at(2024, 3, 9, 10, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);

        let s = ScheduleExpr::parse("0 9 * * 5-7").unwrap();
        let next = s.next_after(at(2024, 3, 9, 10, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn out_of_range_weekday_is_rejected() {
        assert!(matches!(
            ScheduleExpr::parse("0 9 * * 8"),
            Err(ScheduleError::DayOfWeek { .. })
        ));
    }

    #[test]
    fn named_weekdays_pass_through() {
        assert_eq!(normalize_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert_eq!(normalize_day_of_week("*").unwrap(), "*");
        assert_eq!(normalize_day_of_week("1,3,5").unwrap(), "MON,WED,FRI");
        assert_eq!(normalize_day_of_week("0-7").unwrap(), "SUN-SAT");
    }

    #[test]
    fn source_is_preserved() {
        let s: ScheduleExpr = " 0 */10 * * * ".parse().unwrap();
        assert_eq!(s.source(), "0 */10 * * *");
    }
}
