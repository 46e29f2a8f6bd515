//! Stopwatch for tracking how long it takes to run tests.
//!
//! A stopwatch records a start time using both the realtime clock (for
//! display) and the monotonic clock (for measuring durations). Reading the
//! elapsed time never changes the state of the stopwatch; it must be stopped
//! explicitly.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

#[derive(Clone, Copy, Debug)]
enum StopwatchState {
    NotStarted,
    Running {
        start_time: DateTime<Local>,
        instant: Instant,
    },
    Stopped {
        start_time: DateTime<Local>,
        duration: Duration,
    },
}

/// Measures the wall-clock duration of a single test.
#[derive(Clone, Debug)]
pub struct Stopwatch {
    state: StopwatchState,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Constructor. The stopwatch is not started.
    pub fn new() -> Self {
        Self {
            state: StopwatchState::NotStarted,
        }
    }

    /// Start the stopwatch. Restarting a running or stopped stopwatch resets
    /// it.
    pub fn start(&mut self) {
        self.state = StopwatchState::Running {
            // These two syscalls will happen imperceptibly close to each other, which is good
            // enough for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        };
    }

    /// Stop the stopwatch and freeze its duration. Only the first call after
    /// `start` has an effect. Stopping a stopwatch which was never started
    /// does nothing.
    pub fn stop(&mut self) {
        if let StopwatchState::Running {
            start_time,
            instant,
        } = self.state
        {
            self.state = StopwatchState::Stopped {
                start_time,
                duration: instant.elapsed(),
            };
        }
    }

    /// Whether `start` has been called.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, StopwatchState::NotStarted)
    }

    /// Whether `stop` has been called since the stopwatch was started.
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, StopwatchState::Stopped { .. })
    }

    /// The realtime timestamp at which the stopwatch was started, if any.
    pub fn start_time(&self) -> Option<DateTime<Local>> {
        match self.state {
            StopwatchState::NotStarted => None,
            StopwatchState::Running { start_time, .. }
            | StopwatchState::Stopped { start_time, .. } => Some(start_time),
        }
    }

    /// The elapsed duration. Zero if never started; the time so far if still
    /// running; the frozen duration if stopped.
    pub fn elapsed(&self) -> Duration {
        match self.state {
            StopwatchState::NotStarted => Duration::ZERO,
            StopwatchState::Running { instant, .. } => instant.elapsed(),
            StopwatchState::Stopped { duration, .. } => duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_never_started_is_zero() {
        let mut stopwatch = Stopwatch::new();
        assert_eq!(stopwatch.elapsed(), Duration::ZERO);
        stopwatch.stop();
        assert!(!stopwatch.is_started());
        assert!(!stopwatch.is_stopped());
        assert_eq!(stopwatch.elapsed(), Duration::ZERO);
        assert!(stopwatch.start_time().is_none());
    }

    #[test]
    fn test_elapsed_does_not_stop() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start();
        let first = stopwatch.elapsed();
        thread::sleep(Duration::from_millis(5));
        assert!(!stopwatch.is_stopped());
        assert!(stopwatch.elapsed() > first);
    }

    #[test]
    fn test_first_stop_wins() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start();
        stopwatch.stop();
        let frozen = stopwatch.elapsed();
        thread::sleep(Duration::from_millis(5));
        stopwatch.stop();
        assert_eq!(stopwatch.elapsed(), frozen);
        assert!(stopwatch.start_time().is_some());
    }
}
