//! Schedule spec parsing.
//!
//! Accepted forms:
//! - `@every <duration>` with Go-style durations (`500ms`, `30s`, `1m30s`, `2h`)
//! - descriptors: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`, `@hourly`
//! - 5-field cron (`min hour dom month dow`, seconds fixed at 0, weekdays 0-7 with 0 and 7 = Sunday)
//! - 6/7-field cron with seconds (and optional year), weekdays as the `cron` crate reads them (1 = Sunday)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{SpindleError, SpindleResult};

#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    source: String,
    kind: SpecKind,
}

#[derive(Debug, Clone)]
enum SpecKind {
    Every(Duration),
    Cron(Box<Schedule>),
}

impl ScheduleSpec {
    pub fn parse(spec: &str) -> SpindleResult<Self> {
        let source = spec.trim().to_string();
        let invalid = |reason: String| SpindleError::InvalidSpec {
            spec: spec.to_string(),
            reason,
        };

        let kind = if let Some(rest) = source.strip_prefix("@every") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(invalid("missing interval after @every".into()));
            }
            let every = parse_go_duration(rest).map_err(invalid)?;
            if every.is_zero() {
                return Err(invalid("interval must be positive".into()));
            }
            SpecKind::Every(every)
        } else if source.starts_with('@') {
            let expr = match source.as_str() {
                "@yearly" | "@annually" => "0 0 0 1 1 *",
                "@monthly" => "0 0 0 1 * *",
                "@weekly" => "0 0 0 * * Sun",
                "@daily" | "@midnight" => "0 0 0 * * *",
                "@hourly" => "0 0 * * * *",
                other => return Err(invalid(format!("unknown descriptor {other}"))),
            };
            SpecKind::Cron(Box::new(parse_cron(expr).map_err(invalid)?))
        } else {
            let mut fields: Vec<String> = source.split_whitespace().map(String::from).collect();
            let expr = match fields.len() {
                5 => {
                    fields[4] = standard_day_of_week(&fields[4]).map_err(invalid)?;
                    format!("0 {}", fields.join(" "))
                }
                6 | 7 => source.clone(),
                n => return Err(invalid(format!("expected 5, 6 or 7 cron fields, got {n}"))),
            };
            SpecKind::Cron(Box::new(parse_cron(&expr).map_err(invalid)?))
        };

        Ok(Self { source, kind })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Fixed interval for `@every` specs.
    pub fn interval(&self) -> Option<Duration> {
        match &self.kind {
            SpecKind::Every(d) => Some(*d),
            SpecKind::Cron(_) => None,
        }
    }

    /// First fire time for an entry registered at `registered_at`.
    pub fn first_after(&self, registered_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            SpecKind::Every(every) => {
                let every = chrono::Duration::from_std(*every).ok()?;
                registered_at.checked_add_signed(every)
            }
            SpecKind::Cron(schedule) => schedule.after(&registered_at).next(),
        }
    }

    /// Next fire time after a fire at `prev`, skipping every slot `<= now`.
    ///
    /// `@every` stays on the `prev + k * interval` grid so missed ticks neither
    /// burst nor drift.
    pub fn next_after(&self, prev: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            SpecKind::Every(every) => {
                let step = chrono::Duration::from_std(*every).ok()?;
                let step_ms = step.num_milliseconds().max(1);
                let mut next = prev.checked_add_signed(step)?;
                if next <= now {
                    let behind_ms = (now - next).num_milliseconds();
                    let skip = behind_ms / step_ms + 1;
                    next = next.checked_add_signed(chrono::Duration::milliseconds(
                        skip.checked_mul(step_ms)?,
                    ))?;
                }
                Some(next)
            }
            SpecKind::Cron(schedule) => {
                let from = if prev > now { prev } else { now };
                schedule.after(&from).next()
            }
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for ScheduleSpec {
    type Err = SpindleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_cron(expr: &str) -> Result<Schedule, String> {
    Schedule::from_str(expr).map_err(|e| e.to_string())
}

/// Rewrite a standard day-of-week field (`0-7`, both 0 and 7 are Sunday) into
/// the `cron` crate's numbering (`1-7`, 1 is Sunday).
///
/// Numeric ranges and steps are expanded into an explicit list so `5-7`
/// (Fri..Sun) wraps correctly. Day names pass through unchanged.
fn standard_day_of_week(field: &str) -> Result<String, String> {
    let parse_day = |s: &str| -> Result<u32, String> {
        let day: u32 = s
            .parse()
            .map_err(|_| format!("bad day of week {s:?} in {field:?}"))?;
        if day > 7 {
            return Err(format!("day of week {day} out of range 0-7"));
        }
        Ok(day)
    };

    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("bad step in {item:?}"))?;
                if step == 0 {
                    return Err(format!("zero step in {item:?}"));
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        if base.chars().any(|c| c.is_ascii_alphabetic()) {
            items.push(item.to_string());
            continue;
        }
        let (lo, hi) = match base {
            "*" | "?" if step.is_none() => {
                items.push(base.to_string());
                continue;
            }
            "*" | "?" => (0, 6),
            _ => match base.split_once('-') {
                Some((lo, hi)) => (parse_day(lo)?, parse_day(hi)?),
                None if step.is_some() => (parse_day(base)?, 6),
                None => {
                    let day = parse_day(base)?;
                    (day, day)
                }
            },
        };
        if lo > hi {
            return Err(format!("day of week range {lo}-{hi} is reversed"));
        }

        let days: BTreeSet<u32> = (lo..=hi)
            .step_by(step.unwrap_or(1))
            .map(|day| day % 7 + 1)
            .collect();
        items.extend(days.into_iter().map(|day| day.to_string()));
    }
    Ok(items.join(","))
}

/// Parse a Go-style duration: one or more `<number><unit>` groups,
/// units `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. Fractions are allowed (`1.5h`).
pub fn parse_go_duration(input: &str) -> Result<Duration, String> {
    let mut rest = input;
    if rest.is_empty() {
        return Err("empty duration".into());
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(format!("expected a number in {input:?}"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("bad number in {input:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(format!("missing unit in {input:?}")),
            unit => return Err(format!("unknown unit {unit:?} in {input:?}")),
        };
        rest = &rest[unit_len..];
        total_nanos += value * nanos_per_unit;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("duration {input:?} out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
