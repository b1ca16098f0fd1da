use std::str::FromStr;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// Compute the next execution time in unix ms, strictly after `now_ms`.
///
/// Returns `None` when the schedule is exhausted: an `At` instant already in
/// the past, an `Every` with a non-positive interval, or a cron expression
/// that no longer parses (logged and skipped rather than crashing the
/// timer).
pub fn compute_next_run(schedule: &Schedule, now_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::At { at_ms } => {
            if *at_ms > now_ms {
                Some(*at_ms)
            } else {
                None
            }
        }

        Schedule::Every { every_ms } => {
            if *every_ms > 0 {
                Some(now_ms + every_ms)
            } else {
                None
            }
        }

        Schedule::Cron { expr, tz } => {
            let parsed = match cron::Schedule::from_str(expr) {
                Ok(p) => p,
                Err(e) => {
                    warn!(expr, error = %e, "stored cron expression no longer parses");
                    return None;
                }
            };
            let zone = resolve_tz(tz.as_deref());
            let now = zone.timestamp_millis_opt(now_ms).single()?;
            // `after` is exclusive, so a match at exactly `now` lands on the
            // following occurrence.
            parsed.after(&now).next().map(|dt| dt.timestamp_millis())
        }
    }
}

/// Validate a schedule at creation time.
///
/// Cron expressions must parse and the timezone must be a known IANA name.
pub fn validate(schedule: &Schedule) -> Result<()> {
    if let Schedule::Cron { expr, tz } = schedule {
        cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::ScheduleParse(format!("{expr}: {e}")))?;
        if let Some(name) = tz {
            Tz::from_str(name)
                .map_err(|_| SchedulerError::ScheduleParse(format!("unknown timezone: {name}")))?;
        }
    }
    Ok(())
}

fn resolve_tz(tz: Option<&str>) -> Tz {
    tz.and_then(|name| Tz::from_str(name).ok())
        .unwrap_or(chrono_tz::UTC)
}

/// Current wall clock in unix ms.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
