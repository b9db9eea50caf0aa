//! Timezone-aware cron evaluation.
//!
//! Standard 5-field form (minute hour dom month dow) with an optional
//! leading seconds field. Supports `*`, `*/n` (values divisible by n),
//! comma lists, and ranges. Expressions are parsed once into per-field
//! bitmasks; the next occurrence is found by walking calendar days and
//! descending hour → minute → second through the masks, so a year of
//! minutes is never enumerated.
//!
//! Local times that fall into a DST gap are skipped to the next firing
//! time (which may still be on the same day); ambiguous fall-back times
//! resolve to the earlier instant.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

/// Day-level search bound. Four years covers expressions that only fire
/// on February 29th.
const MAX_DAYS: u32 = 4 * 366;

/// Parse a timezone string into a `chrono_tz::Tz`, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Check an expression for well-formedness (field count, syntax, and
/// value ranges) without evaluating it.
pub fn validate_cron(expr: &str) -> Result<(), String> {
    CronExpr::parse(expr).map(|_| ())
}

/// Next occurrence strictly after `after`, evaluated in `tz`, as UTC.
pub fn cron_next_tz(
    expr: &str,
    after: &DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Option<DateTime<Utc>> {
    CronExpr::parse(expr).ok()?.next_occurrence(after, tz)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field masks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One cron field as a bit set over its value range (all values ≤ 59,
/// so a u64 always suffices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldMask(u64);

impl FieldMask {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    fn first(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }

    /// Smallest set value ≥ `floor`.
    fn first_from(self, floor: u32) -> Option<u32> {
        if floor >= 64 {
            return None;
        }
        let masked = self.0 & (u64::MAX << floor);
        if masked == 0 {
            None
        } else {
            Some(masked.trailing_zeros())
        }
    }
}

fn parse_field(text: &str, lo: u32, hi: u32) -> Result<FieldMask, String> {
    let full = || {
        let mut bits = 0u64;
        for v in lo..=hi {
            bits |= 1 << v;
        }
        bits
    };

    if text == "*" {
        return Ok(FieldMask(full()));
    }

    if let Some(step_text) = text.strip_prefix("*/") {
        let step: u32 = step_text
            .parse()
            .map_err(|_| format!("bad step '{text}'"))?;
        if step == 0 {
            return Err(format!("zero step in '{text}'"));
        }
        let mut bits = 0u64;
        for v in lo..=hi {
            if v % step == 0 {
                bits |= 1 << v;
            }
        }
        return Ok(FieldMask(bits));
    }

    let mut bits = 0u64;
    for part in text.split(',') {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (
                a.parse::<u32>().map_err(|_| format!("bad value '{part}'"))?,
                b.parse::<u32>().map_err(|_| format!("bad value '{part}'"))?,
            ),
            None => {
                let v = part
                    .parse::<u32>()
                    .map_err(|_| format!("bad value '{part}'"))?;
                (v, v)
            }
        };
        if start > end {
            return Err(format!("inverted range '{part}'"));
        }
        if start < lo || end > hi {
            return Err(format!("'{part}' outside {lo}..={hi}"));
        }
        for v in start..=end {
            bits |= 1 << v;
        }
    }
    Ok(FieldMask(bits))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsed expression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct CronExpr {
    seconds: FieldMask,
    minutes: FieldMask,
    hours: FieldMask,
    days_of_month: FieldMask,
    months: FieldMask,
    /// 0 = Sunday.
    days_of_week: FieldMask,
}

impl CronExpr {
    fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (seconds_text, rest): (&str, &[&str]) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => return Err(format!("expected 5 or 6 fields, got {n} in '{expr}'")),
        };

        Ok(Self {
            seconds: parse_field(seconds_text, 0, 59)?,
            minutes: parse_field(rest[0], 0, 59)?,
            hours: parse_field(rest[1], 0, 23)?,
            days_of_month: parse_field(rest[2], 1, 31)?,
            months: parse_field(rest[3], 1, 12)?,
            days_of_week: parse_field(rest[4], 0, 6)?,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        self.months.contains(date.month())
            && self.days_of_month.contains(date.day())
            && self.days_of_week.contains(date.weekday().num_days_from_sunday())
    }

    /// Smallest firing time strictly after `floor` (or the day's first
    /// firing time when `floor` is `None`).
    fn first_time_after(&self, floor: Option<NaiveTime>) -> Option<NaiveTime> {
        let floor = match floor {
            None => {
                return NaiveTime::from_hms_opt(
                    self.hours.first()?,
                    self.minutes.first()?,
                    self.seconds.first()?,
                );
            }
            Some(f) => f,
        };

        let mut hour_floor = floor.hour();
        while let Some(hour) = self.hours.first_from(hour_floor) {
            let mut minute_floor = if hour == floor.hour() { floor.minute() } else { 0 };
            loop {
                let Some(minute) = self.minutes.first_from(minute_floor) else {
                    break;
                };
                let second_floor = if hour == floor.hour() && minute == floor.minute() {
                    floor.second() + 1
                } else {
                    0
                };
                if let Some(second) = self.seconds.first_from(second_floor) {
                    return NaiveTime::from_hms_opt(hour, minute, second);
                }
                minute_floor = minute + 1;
            }
            hour_floor = hour + 1;
        }
        None
    }

    /// Earliest UTC instant on `date` firing after `floor`, skipping
    /// local times a DST transition removed.
    fn next_on_date(
        &self,
        date: NaiveDate,
        mut floor: Option<NaiveTime>,
        tz: chrono_tz::Tz,
    ) -> Option<DateTime<Utc>> {
        loop {
            let time = self.first_time_after(floor)?;
            let local: NaiveDateTime = date.and_time(time);
            // `earliest` also picks the pre-transition instant for
            // ambiguous fall-back times.
            if let Some(resolved) = tz.from_local_datetime(&local).earliest() {
                return Some(resolved.with_timezone(&Utc));
            }
            floor = Some(time);
        }
    }

    fn next_occurrence(
        &self,
        after: &DateTime<Utc>,
        tz: chrono_tz::Tz,
    ) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let mut date = local.date();
        let mut floor = Some(local.time());

        for _ in 0..MAX_DAYS {
            if self.day_matches(date) {
                if let Some(hit) = self.next_on_date(date, floor, tz) {
                    return Some(hit);
                }
            }
            floor = None;
            date = date.succ_opt()?;
        }
        None
    }
}
