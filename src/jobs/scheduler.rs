use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::Pipeline;
use crate::time::{from_source_local, source_day_start, source_today};

/// Next instant, strictly after `now`, at which the source-local wall clock
/// shows `at`.
pub fn next_coarse_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = source_today(now);
    for day in [today, today + Duration::days(1)] {
        let candidate = from_source_local(day, at).unwrap_or_else(|| source_day_start(day));
        if candidate > now {
            return candidate;
        }
    }
    source_day_start(today + Duration::days(2))
}

/// Drive the pipeline forever: the coarse sweep once a day at `coarse_at`
/// (source time), the fine sweep every `fine_every`. Passes never overlap;
/// a tick that comes due during a pass waits for it.
pub async fn run_scheduler(pipeline: Arc<Pipeline>, coarse_at: NaiveTime, fine_every: StdDuration) {
    info!(
        "Scheduler started (coarse at {} source time, fine every {:?})",
        coarse_at.format("%H:%M"),
        fine_every
    );
    let mut fine = tokio::time::interval(fine_every);
    fine.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let now = Utc::now();
        let next = next_coarse_run(now, coarse_at);
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match pipeline.coarse_sweep_with_retry(Utc::now()).await {
                    Ok(report) => info!("Scheduled coarse sweep finished: {:?}", report),
                    Err(e) => error!("Coarse sweep abandoned for this cycle: {:#}", e),
                }
            }
            _ = fine.tick() => {
                if let Err(e) = pipeline.fine_sweep(Utc::now()).await {
                    error!("Fine sweep failed: {:#}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn half_past_midnight() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 30, 0).unwrap()
    }

    #[test]
    fn later_the_same_source_day() {
        // 22:00 UTC is 23:00 source time; 00:30 source is 23:30 UTC.
        let now = Utc.with_ymd_and_hms(2025, 10, 28, 22, 0, 0).unwrap();
        assert_eq!(
            next_coarse_run(now, half_past_midnight()),
            Utc.with_ymd_and_hms(2025, 10, 28, 23, 30, 0).unwrap()
        );
    }

    #[test]
    fn rolls_over_once_the_time_has_passed() {
        let now = Utc.with_ymd_and_hms(2025, 10, 29, 9, 0, 0).unwrap();
        assert_eq!(
            next_coarse_run(now, half_past_midnight()),
            Utc.with_ymd_and_hms(2025, 10, 29, 23, 30, 0).unwrap()
        );
    }

    #[test]
    fn exact_instant_schedules_the_next_day() {
        let now = Utc.with_ymd_and_hms(2025, 10, 28, 23, 30, 0).unwrap();
        assert_eq!(
            next_coarse_run(now, half_past_midnight()),
            Utc.with_ymd_and_hms(2025, 10, 29, 23, 30, 0).unwrap()
        );
    }
}
