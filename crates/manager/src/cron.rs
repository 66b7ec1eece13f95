//! Cron expression parsing and due-time evaluation under tick jitter.
//!
//! The process owns no timer: an external tick source calls in and each
//! enabled cron task is checked against the most recent scheduled moment.
//! A moment fires at most once: the `last_run < previous_scheduled` check
//! makes ticks idempotent however unevenly they arrive.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

/// Parse a cron expression.
///
/// Task definitions carry standard 5-field cron (min hr dom mon dow); the
/// `cron` crate also wants a seconds field, so a bare 5-field expression
/// gains a leading zero before parsing.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    match expr.split_whitespace().count() {
        5 => format!("0 {expr}").parse(),
        _ => expr.parse(),
    }
}

/// The largest scheduled moment `<= now`, provided it is newer than
/// `now - window` (older moments are stale and never fire).
pub fn previous_fire_in_window(
    schedule: &Schedule,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<DateTime<Utc>> {
    let floor = now - window;
    let mut previous = None;
    for moment in schedule.after(&floor) {
        if moment > now {
            break;
        }
        previous = Some(moment);
    }
    previous
}

/// Whether a task is due at `now`. Returns the scheduled moment being
/// consumed so the caller can record it as the run's `last_run`.
pub fn due_at(
    schedule: &Schedule,
    now: DateTime<Utc>,
    window: Duration,
    last_run: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let previous = previous_fire_in_window(schedule, now, window)?;
    match last_run {
        None => Some(previous),
        Some(last) if last < previous => Some(previous),
        Some(_) => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
