//! Run cadence: cron parsing, next-tick computation, and trigger kinds.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("invalid cron expression {expr:?}: {source}")]
pub struct ScheduleError {
    expr: String,
    #[source]
    source: cron::error::Error,
}

/// What started a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled { tick: DateTime<Utc> },
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled { tick } => write!(f, "scheduled ({})", tick.to_rfc3339()),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// A cron cadence evaluated in UTC.
#[derive(Debug, Clone)]
pub struct Schedule {
    expr: String,
    inner: CronSchedule,
}

impl Schedule {
    /// Parse a 5-field crontab expression (`min hour dom month dow`, Sunday is 0 or 7)
    /// or a 6-field one with seconds. 6-field input uses the cron crate's own
    /// syntax as is, where day-of-week runs 1-7 from Sunday.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let normalized = normalize_cron(expr);
        let inner = CronSchedule::from_str(&normalized).map_err(|source| ScheduleError {
            expr: expr.to_string(),
            source,
        })?;
        Ok(Self {
            expr: expr.trim().to_string(),
            inner,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Next tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }

    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.inner.after(&after).take(count).collect()
    }
}

/// The cron crate wants a seconds field; 5-field input gets `0` prepended and
/// its day-of-week field renumbered from crontab's.
fn normalize_cron(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return expr.trim().to_string();
    }
    let dow = crontab_dow(fields[4]).unwrap_or_else(|| fields[4].to_string());
    format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow)
}

/// Crontab day-of-week (0-7, Sunday is 0 and 7) as a cron crate list (1-7,
/// Sunday is 1). Names and `*` pass through unchanged; `None` leaves the field
/// for the cron parser to reject.
fn crontab_dow(field: &str) -> Option<String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut days = [false; 7];
    for term in field.split(',') {
        let (range, step) = match term.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (term, 1),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 7),
            Some((a, b)) => (a.parse::<usize>().ok()?, b.parse::<usize>().ok()?),
            // `n/s` runs to the end of the week.
            None if term.contains('/') => (range.parse::<usize>().ok()?, 7),
            None => {
                let n = range.parse::<usize>().ok()?;
                (n, n)
            }
        };
        if start > end || end > 7 {
            return None;
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }
    let list: Vec<String> = (0..7).filter(|d| days[*d]).map(|d| (d + 1).to_string()).collect();
    Some(list.join(","))
}
