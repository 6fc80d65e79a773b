//! Cycle scheduling.
//!
//! Cycles never overlap: the scheduler awaits each cycle before it sleeps
//! again. Both modes keep a fixed cadence anchored to the first cycle
//! (first, first + interval, ...); if a cycle overruns one or more slots the
//! missed slots are dropped rather than run back-to-back. Cancellation is
//! only observed while waiting, so a running cycle always completes.

use std::time::Duration;

use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Something that can run one collection cycle. Failures are the runner's
/// business; the scheduler only needs the cycle to finish.
#[allow(async_fn_in_trait)]
pub trait CycleRunner {
    async fn run_cycle(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    WaitingForStart,
    Running,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    WindowElapsed,
    Interrupted,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScheduleError {
    #[error("end time {end} is before start time {start}")]
    EndBeforeStart {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("interval must be at least one minute")]
    ZeroInterval,
    #[error("invalid date/time '{0}' (expected YYYY-MM-DD HH:MM[:SS])")]
    InvalidDateTime(String),
}

/// Local wall-clock bounds for windowed collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl CollectionWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, ScheduleError> {
        if end < start {
            return Err(ScheduleError::EndBeforeStart { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }
}

/// Tomorrow at 09:00, the default start for windowed runs
pub fn default_window_start(now: NaiveDateTime) -> NaiveDateTime {
    let tomorrow = now.date() + Days::new(1);
    tomorrow.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default())
}

pub fn parse_local_datetime(value: &str) -> Result<NaiveDateTime, ScheduleError> {
    const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    let value = value.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| ScheduleError::InvalidDateTime(value.to_string()))
}

pub fn interval_from_minutes(minutes: u64) -> Result<Duration, ScheduleError> {
    if minutes == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    Ok(Duration::from_secs(minutes * 60))
}

pub struct Scheduler {
    interval: Duration,
    shutdown: CancellationToken,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            interval,
            shutdown,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn enter(&mut self, state: SchedulerState) {
        debug!(from = ?self.state, to = ?state, "Scheduler state change");
        self.state = state;
    }

    /// Run a cycle now, then one per interval until interrupted.
    #[instrument(skip(self, runner), fields(interval_secs = self.interval.as_secs()))]
    pub async fn run_interval<R: CycleRunner>(&mut self, runner: &mut R) -> StopReason {
        info!(
            "Collection scheduled every {} minutes",
            self.interval.as_secs() / 60
        );
        if self.interrupted_early() {
            return StopReason::Interrupted;
        }
        self.run_cadence(runner, Instant::now(), None).await
    }

    /// Windowed mode using the current local time as "now"
    pub async fn run_window<R: CycleRunner>(
        &mut self,
        runner: &mut R,
        window: CollectionWindow,
    ) -> StopReason {
        self.run_window_from(runner, window, Local::now().naive_local())
            .await
    }

    /// Windowed mode. `now` is the wall-clock time corresponding to the
    /// current monotonic instant; the window bounds are converted once and
    /// all waiting afterwards is monotonic.
    #[instrument(skip(self, runner), fields(interval_secs = self.interval.as_secs()))]
    pub async fn run_window_from<R: CycleRunner>(
        &mut self,
        runner: &mut R,
        window: CollectionWindow,
        now: NaiveDateTime,
    ) -> StopReason {
        info!("Starting scheduled collection program");
        info!("Start: {}", window.start);
        info!("End: {}", window.end);
        info!("Interval: {} minutes", self.interval.as_secs() / 60);

        if self.interrupted_early() {
            return StopReason::Interrupted;
        }

        let origin = Instant::now();
        let end_at = match (window.end - now).to_std() {
            Ok(until_end) => origin + until_end,
            Err(_) => {
                info!("End time already passed, nothing to collect");
                self.enter(SchedulerState::Stopped);
                return StopReason::WindowElapsed;
            }
        };

        let mut first = origin;
        if let Ok(until_start) = (window.start - now).to_std() {
            if !until_start.is_zero() {
                first = origin + until_start;
                self.enter(SchedulerState::WaitingForStart);
                info!(
                    "Waiting {:.1} minutes until start time ({})",
                    until_start.as_secs_f64() / 60.0,
                    window.start
                );
                if self.sleep_until(first).await.is_err() {
                    return StopReason::Interrupted;
                }
            }
        }

        let reason = self.run_cadence(runner, first, Some(end_at)).await;
        if reason == StopReason::WindowElapsed {
            info!("Collection program finished as scheduled");
        }
        reason
    }

    /// Cycles at `first`, `first + interval`, ... until interrupted or the
    /// next slot would fall after `end_at`.
    async fn run_cadence<R: CycleRunner>(
        &mut self,
        runner: &mut R,
        first: Instant,
        end_at: Option<Instant>,
    ) -> StopReason {
        let mut next = first;

        loop {
            self.enter(SchedulerState::Running);
            info!("Starting data collection process");
            runner.run_cycle().await;
            info!("Data collection process completed");

            next += self.interval;
            let current = Instant::now();
            while next < current {
                next += self.interval;
            }

            if end_at.is_some_and(|end_at| next > end_at) {
                info!("Next run exceeds end time. Finishing program.");
                self.enter(SchedulerState::Stopped);
                return StopReason::WindowElapsed;
            }

            self.enter(SchedulerState::Sleeping);
            info!(
                "Waiting {:.1} minutes until next collection",
                next.saturating_duration_since(current).as_secs_f64() / 60.0
            );
            if self.sleep_until(next).await.is_err() {
                return StopReason::Interrupted;
            }
        }
    }

    fn interrupted_early(&mut self) -> bool {
        if self.shutdown.is_cancelled() {
            info!("Shutdown requested before the first collection");
            self.enter(SchedulerState::Stopped);
            return true;
        }
        false
    }

    /// Sleep until `deadline`, or return `Err(())` once shutdown is requested
    async fn sleep_until(&mut self, deadline: Instant) -> Result<(), ()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!("Collection program stopped manually by user");
                self.enter(SchedulerState::Stopped);
                Err(())
            }
            _ = time::sleep_until(deadline) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_window_rejects_end_before_start() {
        let result = CollectionWindow::new(at(10, 9, 0), at(9, 9, 0));
        assert!(matches!(result, Err(ScheduleError::EndBeforeStart { .. })));
        assert!(CollectionWindow::new(at(10, 9, 0), at(10, 9, 0)).is_ok());
    }

    #[test]
    fn test_default_window_start_is_tomorrow_morning() {
        assert_eq!(default_window_start(at(7, 22, 15)), at(8, 9, 0));
        assert_eq!(default_window_start(at(7, 3, 0)), at(8, 9, 0));
    }

    #[test]
    fn test_parse_local_datetime() {
        assert_eq!(parse_local_datetime("2025-04-15 09:00:00").unwrap(), at(15, 9, 0));
        assert_eq!(parse_local_datetime("2025-04-15T09:00:00").unwrap(), at(15, 9, 0));
        assert_eq!(parse_local_datetime(" 2025-04-15 09:00 ").unwrap(), at(15, 9, 0));
        assert!(matches!(
            parse_local_datetime("15/04/2025"),
            Err(ScheduleError::InvalidDateTime(_))
        ));
    }

    #[test]
    fn test_interval_from_minutes() {
        assert_eq!(interval_from_minutes(120).unwrap(), Duration::from_secs(7200));
        assert_eq!(interval_from_minutes(0), Err(ScheduleError::ZeroInterval));
    }

    #[test]
    fn test_new_scheduler_is_idle() {
        let scheduler = Scheduler::new(Duration::from_secs(60), CancellationToken::new());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
