//! Nightly auto-checkout trigger
//!
//! Fires on a cron schedule evaluated in the civil offset and closes the
//! sessions still open from the previous civil day. Failures are logged and
//! the loop waits for the next tick.

use chrono::{DateTime, FixedOffset};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;

use super::attendance::AttendanceEngine;
use crate::config::AttendanceConfig;

/// Parse a six-field (seconds first) or five-field cron expression
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
}

/// Next firing strictly after `now`, in the same offset
pub fn next_fire(schedule: &Schedule, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    schedule.after(&now).next()
}

/// Spawn the background auto-checkout loop
pub fn spawn_auto_checkout_task(engine: Arc<AttendanceEngine>, config: AttendanceConfig) {
    if !config.auto_checkout_enabled {
        tracing::info!("Auto-checkout is disabled");
        return;
    }

    let schedule = match parse_schedule(&config.auto_checkout_cron) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!(
                cron = %config.auto_checkout_cron,
                error = %e,
                "Invalid auto-checkout schedule, task not started"
            );
            return;
        }
    };

    tracing::info!(
        cron = %config.auto_checkout_cron,
        utc_offset_minutes = config.utc_offset_minutes,
        "Starting auto-checkout task"
    );

    tokio::spawn(async move {
        loop {
            let now = engine.civil().local(engine.clock().now());
            let Some(next) = next_fire(&schedule, now) else {
                tracing::warn!("Auto-checkout schedule has no upcoming runs, stopping");
                return;
            };

            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next, "Auto-checkout scheduled");
            tokio::time::sleep(wait).await;

            tracing::info!("Running auto-checkout sweep");
            match engine.auto_checkout_open_sessions().await {
                Ok(result) => {
                    tracing::info!(
                        checked_out = result.checked_out,
                        errors = result.errors,
                        "Auto-checkout sweep finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Auto-checkout sweep failed");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CivilTime;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_midnight_in_civil_offset() {
        let civil = CivilTime::new(330).unwrap();
        let schedule = parse_schedule("0 0 0 * * *").unwrap();
        // 2025-03-10 15:00 IST
        let now = civil.local(Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap());
        let next = next_fire(&schedule, now).unwrap();
        assert_eq!(next.to_rfc3339(), "2025-03-11T00:00:00+05:30");
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2025, 3, 10, 18, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_five_field_expression() {
        let civil = CivilTime::new(0).unwrap();
        let schedule = parse_schedule("30 2 * * *").unwrap();
        let now = civil.local(Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap());
        let next = next_fire(&schedule, now).unwrap();
        assert_eq!(next.to_rfc3339(), "2025-03-11T02:30:00+00:00");
    }

    #[test]
    fn test_invalid_expression() {
        tokio_test::assert_err!(parse_schedule("not a cron"));
        tokio_test::assert_ok!(parse_schedule("0 0 0 * * *"));
    }
}
