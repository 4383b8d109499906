//! # Loop rate utilities
//!
//! - [`RateGovernor`] paces a loop to a target frequency by sleeping for whatever is left of the
//!   cycle period once the loop body has finished.
//! - [`Backoff`] provides bounded exponential delays for retrying after transport errors.
//! - [`FpsCounter`] counts events over a one second window.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default first delay of a [`Backoff`].
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(50);

/// Default longest delay of a [`Backoff`].
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Paces a loop to a fixed period.
///
/// Call [`cycle_start`](Self::cycle_start) at the top of the loop body and
/// [`cycle_end`](Self::cycle_end) at the bottom. If the body took longer than the period no sleep
/// occurs and the next cycle starts straight away, missed cycles are not made up.
#[derive(Debug)]
pub struct RateGovernor {
    name: String,
    period: Duration,
    cycle_start: Option<Instant>,

    /// Number of completed cycles
    pub num_cycles: u64,

    /// Total number of cycles which overran the period
    pub num_overruns: u64,

    /// Number of consecutive cycles which overran the period
    pub num_consec_overruns: u64,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

/// Counts events in consecutive windows of fixed length.
///
/// The rate is recomputed each time an event or poll crosses the end of the current window.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    count: u32,
    fps: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The result of ending a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle finished early and the governor slept for the given duration.
    OnTime(Duration),

    /// The cycle took longer than the period by the given duration.
    Overrun(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("The loop frequency must be finite and greater than zero, got {0}")]
    InvalidFrequency(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RateGovernor {
    /// Create a governor for the named loop with the given period.
    pub fn new<S: Into<String>>(name: S, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            cycle_start: None,
            num_cycles: 0,
            num_overruns: 0,
            num_consec_overruns: 0,
        }
    }

    /// Create a governor for the named loop running at the given frequency.
    pub fn from_hz<S: Into<String>>(name: S, frequency_hz: f64) -> Result<Self, RateError> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(RateError::InvalidFrequency(frequency_hz));
        }

        Ok(Self::new(name, Duration::from_secs_f64(1.0 / frequency_hz)))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Mark the start of a cycle.
    pub fn cycle_start(&mut self) {
        self.cycle_start = Some(Instant::now());
    }

    /// Mark the end of a cycle, sleeping for the remainder of the period.
    pub fn cycle_end(&mut self) -> CycleOutcome {
        let cycle_dur = match self.cycle_start.take() {
            Some(s) => s.elapsed(),
            None => Duration::from_secs(0),
        };

        let outcome = self.account(cycle_dur);

        if let CycleOutcome::OnTime(d) = outcome {
            thread::sleep(d);
        }

        outcome
    }

    /// Run one cycle of the loop body and pace it.
    pub fn tick<F, R>(&mut self, body: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.cycle_start();
        let r = body();
        self.cycle_end();
        r
    }

    /// Update the counters for a cycle of the given length and work out how long to sleep.
    fn account(&mut self, cycle_dur: Duration) -> CycleOutcome {
        self.num_cycles += 1;

        match self.period.checked_sub(cycle_dur) {
            Some(d) => {
                self.num_consec_overruns = 0;
                CycleOutcome::OnTime(d)
            }
            None => {
                let by = cycle_dur - self.period;
                self.num_overruns += 1;
                self.num_consec_overruns += 1;

                // Only the first of a run of overruns is a warning
                if self.num_consec_overruns == 1 {
                    warn!("{} cycle overran by {:.06} s", self.name, by.as_secs_f64());
                } else {
                    debug!(
                        "{} cycle overran by {:.06} s ({} consecutive)",
                        self.name,
                        by.as_secs_f64(),
                        self.num_consec_overruns
                    );
                }

                CycleOutcome::Overrun(by)
            }
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Get the next delay, doubling the one after it up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Sleep for the next delay, returning how long was slept.
    pub fn wait(&mut self) -> Duration {
        let delay = self.next_delay();
        thread::sleep(delay);
        delay
    }

    /// Return to the initial delay, called after a success.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MAX)
    }
}

impl FpsCounter {
    /// Counter with a one second window starting now.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1), Instant::now())
    }

    pub fn with_window(window: Duration, start: Instant) -> Self {
        Self {
            window,
            window_start: start,
            count: 0,
            fps: None,
        }
    }

    /// Record an event which happened at `now`.
    ///
    /// Returns the newly computed rate if the event closed a window.
    pub fn record_at(&mut self, now: Instant) -> Option<f64> {
        let rolled = self.poll_at(now);
        self.count += 1;
        rolled
    }

    /// Record an event which happened now.
    pub fn record(&mut self) -> Option<f64> {
        self.record_at(Instant::now())
    }

    /// Close the current window if `now` is past its end, without recording an event.
    ///
    /// Used by loops which may go a long time without events so that the rate falls to zero.
    pub fn poll_at(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.window_start);

        if elapsed < self.window {
            return None;
        }

        let fps = self.count as f64 / elapsed.as_secs_f64();
        self.fps = Some(fps);
        self.count = 0;
        self.window_start = now;

        Some(fps)
    }

    /// The rate computed at the end of the last window.
    pub fn fps(&self) -> Option<f64> {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
