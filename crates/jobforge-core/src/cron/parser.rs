//! Parses the 5-field cron syntax (minute hour day-of-month month
//! day-of-week) plus the standard nicknames, and computes fire times.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::QueueError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
    /// `@reboot` never fires on a timer; it's handled by the caller at
    /// process startup only.
    reboot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet(Vec<bool>);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.0.get(value as usize).copied().unwrap_or(false)
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(expr) = nickname_expansion(s) {
            if expr == "@reboot" {
                return Ok(CronSchedule {
                    minute: FieldSet(vec![false; 60]),
                    hour: FieldSet(vec![false; 24]),
                    day_of_month: FieldSet(vec![false; 32]),
                    month: FieldSet(vec![false; 13]),
                    day_of_week: FieldSet(vec![false; 7]),
                    reboot: true,
                });
            }
            return expr.parse();
        }

        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(QueueError::InvalidCronExpression(format!(
                "expected 5 fields (minute hour day-of-month month day-of-week), got {}: {s:?}",
                fields.len()
            )));
        }

        Ok(CronSchedule {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
            reboot: false,
        })
    }
}

fn nickname_expansion(s: &str) -> Option<&'static str> {
    match s {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        "@reboot" => Some("@reboot"),
        _ => None,
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<FieldSet, QueueError> {
    let mut bits = vec![false; (max + 1) as usize];

    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => (
                range,
                step.parse::<u32>().map_err(|_| invalid(field, part))?,
            ),
            None => (part, 1),
        };

        if step == 0 {
            return Err(invalid(field, part));
        }

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid(field, part))?;
            let b: u32 = b.parse().map_err(|_| invalid(field, part))?;
            if a > b || a < min || b > max {
                return Err(invalid(field, part));
            }
            (a, b)
        } else {
            let v: u32 = range_part.parse().map_err(|_| invalid(field, part))?;
            if v < min || v > max {
                return Err(invalid(field, part));
            }
            (v, v)
        };

        let mut v = start;
        while v <= end {
            bits[v as usize] = true;
            v += step;
        }
    }

    Ok(FieldSet(bits))
}

fn invalid(field: &str, part: &str) -> QueueError {
    QueueError::InvalidCronExpression(format!("ill-formed field {field:?} (at {part:?})"))
}

impl CronSchedule {
    /// Computes the first fire time strictly after `base`, at minute
    /// resolution. `@reboot` entries never fire on a timer and return `None`.
    pub fn next_after(&self, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.reboot {
            return None;
        }

        // Start at the next whole minute boundary after `base`.
        let mut candidate = (base + Duration::minutes(1))
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap();

        // Bounded scan: four years of minutes is far more than any real cron
        // expression needs (Feb 29 on a Friday being the worst case).
        let limit = candidate + Duration::days(4 * 366);

        while candidate < limit {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }

        None
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        if self.reboot {
            return false;
        }

        let dom_matches = self.day_of_month.contains(at.day());
        let dow_matches = self.day_of_week.contains(at.weekday().num_days_from_sunday());

        // Standard cron quirk: if both day-of-month and day-of-week are
        // restricted (not "*"), a match on either is sufficient.
        let day_matches = if self.day_of_month.0.iter().all(|b| *b) {
            dow_matches
        } else if self.day_of_week.0.iter().all(|b| *b) {
            dom_matches
        } else {
            dom_matches || dow_matches
        };

        self.minute.contains(at.minute())
            && self.hour.contains(at.hour())
            && self.month.contains(at.month())
            && day_matches
    }

    pub fn is_reboot(&self) -> bool {
        self.reboot
    }
}
