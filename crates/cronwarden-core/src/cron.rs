//! Five-field cron expressions.
//!
//! `minute hour day-of-month month day-of-week`, each field accepting `*`,
//! single values, `a-b` ranges, `/n` steps and comma lists. Month and weekday
//! fields also accept three-letter names (`jan`, `mon`). Day-of-week runs
//! 0..=7 where both 0 and 7 are Sunday.
//!
//! Day-of-month and day-of-week are ANDed like every other field; there is no
//! special-case OR between the two.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CronParseError;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// One parsed cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// `*`
    Wildcard,
    /// A single value, e.g. `5`.
    Value(u32),
    /// Inclusive range, e.g. `9-17`.
    Range { start: u32, end: u32 },
    /// Every `step`-th value of an inclusive range, e.g. `*/15` or `0-30/10`.
    Step { start: u32, end: u32, step: u32 },
    /// Comma-separated items, e.g. `1,15,30-40`.
    List(Vec<CronField>),
}

impl CronField {
    pub fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Wildcard => true,
            CronField::Value(v) => *v == value,
            CronField::Range { start, end } => (*start..=*end).contains(&value),
            CronField::Step { start, end, step } => {
                (*start..=*end).contains(&value) && (value - start) % step == 0
            }
            CronField::List(items) => items.iter().any(|item| item.matches(value)),
        }
    }
}

#[derive(Clone, Copy)]
enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 7),
        }
    }

    fn names(self) -> Option<(&'static [&'static str], u32)> {
        match self {
            FieldKind::Month => Some((&MONTH_NAMES, 1)),
            FieldKind::DayOfWeek => Some((&DAY_NAMES, 0)),
            _ => None,
        }
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpr {
    source: String,
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronParseError::new(
                expr,
                format!("expected 5 fields, found {}", parts.len()),
            ));
        }

        let field = |raw: &str, kind: FieldKind| {
            parse_field(raw, kind).map_err(|reason| {
                CronParseError::new(expr, format!("{} field `{raw}`: {reason}", kind.name()))
            })
        };

        Ok(Self {
            source: parts.join(" "),
            minute: field(parts[0], FieldKind::Minute)?,
            hour: field(parts[1], FieldKind::Hour)?,
            day_of_month: field(parts[2], FieldKind::DayOfMonth)?,
            month: field(parts[3], FieldKind::Month)?,
            day_of_week: field(parts[4], FieldKind::DayOfWeek)?,
        })
    }

    /// `* * * * *`
    pub fn every_minute() -> Self {
        Self {
            source: "* * * * *".to_string(),
            minute: CronField::Wildcard,
            hour: CronField::Wildcard,
            day_of_month: CronField::Wildcard,
            month: CronField::Wildcard,
            day_of_week: CronField::Wildcard,
        }
    }

    /// Whether the wall-clock minute containing `at` matches all five fields.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let weekday = at.weekday().num_days_from_sunday();
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && (self.day_of_week.matches(weekday) || (weekday == 0 && self.day_of_week.matches(7)))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronExpr {
    type Error = CronParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CronExpr> for String {
    fn from(expr: CronExpr) -> Self {
        expr.source
    }
}

fn parse_field(raw: &str, kind: FieldKind) -> Result<CronField, String> {
    if raw.is_empty() {
        return Err("empty field".to_string());
    }
    if raw.contains(',') {
        let items = raw
            .split(',')
            .map(|item| parse_item(item, kind))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(CronField::List(items));
    }
    parse_item(raw, kind)
}

fn parse_item(raw: &str, kind: FieldKind) -> Result<CronField, String> {
    let (min, max) = kind.bounds();

    let (range, step) = match raw.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step `{step}`"))?;
            if step == 0 {
                return Err("step must be greater than zero".to_string());
            }
            (range, Some(step))
        }
        None => (raw, None),
    };

    let (start, end, is_single) = if range == "*" {
        (min, max, false)
    } else if let Some((a, b)) = range.split_once('-') {
        let start = parse_value(a, kind)?;
        let end = parse_value(b, kind)?;
        if start > end {
            return Err(format!("range start {start} is after end {end}"));
        }
        (start, end, false)
    } else {
        let value = parse_value(range, kind)?;
        (value, value, true)
    };

    Ok(match (step, range == "*", is_single) {
        (None, true, _) => CronField::Wildcard,
        (None, false, true) => CronField::Value(start),
        (None, false, false) => CronField::Range { start, end },
        // `5/15` means "from 5 to the end of the field, every 15".
        (Some(step), _, true) => CronField::Step { start, end: max, step },
        (Some(step), _, false) => CronField::Step { start, end, step },
    })
}

fn parse_value(raw: &str, kind: FieldKind) -> Result<u32, String> {
    let (min, max) = kind.bounds();
    let value = match raw.parse::<u32>() {
        Ok(v) => v,
        Err(_) => {
            let lower = raw.to_ascii_lowercase();
            kind.names()
                .and_then(|(names, offset)| {
                    names
                        .iter()
                        .position(|n| *n == lower)
                        .map(|i| i as u32 + offset)
                })
                .ok_or_else(|| format!("invalid value `{raw}`"))?
        }
    };
    if value < min || value > max {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}
