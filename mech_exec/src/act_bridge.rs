//! # Actuator Bridge
//!
//! Turns the latest control command into actuator frames at a fixed rate.
//!
//! Fresh commands are taken from the command slot each cycle and held by the bridge. What is
//! written then depends on the [`HoldPolicy`]:
//!
//! - `repeat`: the held command is written every cycle, so the controller keeps receiving its last
//!   demand even when the link goes quiet.
//! - `on_change`: a frame is only written when the held command's demand differs from the last
//!   frame written.
//!
//! Until the first command arrives the neutral command is written. If a failsafe timeout is set
//! and no fresh command has arrived within it, the neutral command replaces the held one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::ControlCommand,
    eqpt::act::ActFormat,
};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use util::{
    rate::{RateError, RateGovernor},
    slot::SharedLatestSlot,
    task::{LoopState, Shutdown, StateCell},
};

use crate::{params::MechExecParams, sink::ActuatorSink};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ActuatorBridge<S: ActuatorSink> {
    slot: SharedLatestSlot<ControlCommand>,

    sink: S,

    format: ActFormat,

    policy: HoldPolicy,

    neutral: ControlCommand,

    failsafe_timeout: Option<Duration>,

    rate: RateGovernor,

    /// Latest command taken from the slot and the time it was taken
    held: Option<(ControlCommand, Instant)>,

    /// Command in the last frame successfully written to the sink
    last_written: Option<ControlCommand>,

    failsafe_active: bool,

    num_consec_failures: u64,

    stats: BridgeStats,
}

/// Counters for the bridge, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub cycles: u64,
    pub written: u64,
    pub unchanged: u64,
    pub sink_failures: u64,
    pub failsafe_activations: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How the bridge treats a held command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldPolicy {
    /// Write the held command every cycle.
    Repeat,

    /// Write only when the demand changes.
    OnChange,
}

/// What happened in one bridge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCycle {
    /// A frame for this command was written.
    Written(ControlCommand),

    /// Nothing was written since the demand has not changed.
    Unchanged,

    /// The sink rejected the frame, the cycle was skipped.
    SinkFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid actuator rate: {0}")]
    RateError(#[from] RateError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for HoldPolicy {
    fn default() -> Self {
        HoldPolicy::Repeat
    }
}

impl<S: ActuatorSink> ActuatorBridge<S> {
    pub fn new(
        params: &MechExecParams,
        slot: SharedLatestSlot<ControlCommand>,
        sink: S,
    ) -> Result<Self, BridgeError> {
        let rate = RateGovernor::from_hz("actuator_bridge", params.act_rate_hz)?;

        Ok(Self {
            slot,
            sink,
            format: params.act_format,
            policy: params.hold_policy,
            neutral: params.schema.neutral(),
            failsafe_timeout: params.failsafe_timeout(),
            rate,
            held: None,
            last_written: None,
            failsafe_active: false,
            num_consec_failures: 0,
            stats: BridgeStats::default(),
        })
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// The sink frames are written to.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run a single cycle now.
    pub fn cycle(&mut self) -> BridgeCycle {
        self.cycle_at(Instant::now())
    }

    /// Run a single cycle as if at the given time.
    pub fn cycle_at(&mut self, now: Instant) -> BridgeCycle {
        self.stats.cycles += 1;

        if let Some(cmd) = self.slot.take() {
            if self.failsafe_active {
                info!("Command received, leaving failsafe");
                self.failsafe_active = false;
            }
            self.held = Some((cmd, now));
        }

        let target = self.target(now);

        if self.policy == HoldPolicy::OnChange {
            if let Some(last) = self.last_written {
                if last == target {
                    self.stats.unchanged += 1;
                    return BridgeCycle::Unchanged;
                }
            }
        }

        let frame = self.format.frame(&target);

        match self.sink.write_frame(&frame) {
            Ok(()) => {
                trace!("Wrote {:?} to {}", frame, self.sink.describe());
                if self.num_consec_failures > 0 {
                    info!(
                        "Actuator sink {} recovered after {} failed cycles",
                        self.sink.describe(),
                        self.num_consec_failures
                    );
                    self.num_consec_failures = 0;
                }
                self.last_written = Some(target);
                self.stats.written += 1;
                BridgeCycle::Written(target)
            }
            Err(e) => {
                self.num_consec_failures += 1;
                self.stats.sink_failures += 1;

                if self.num_consec_failures == 1 {
                    warn!("Skipping actuator cycle, {} failed: {}", self.sink.describe(), e);
                } else {
                    debug!(
                        "Skipping actuator cycle, {} failed ({} consecutive): {}",
                        self.sink.describe(),
                        self.num_consec_failures,
                        e
                    );
                }

                BridgeCycle::SinkFailed
            }
        }
    }

    /// Run cycles at the configured rate until shutdown is requested, returning the stats.
    pub fn run(mut self, shutdown: &Shutdown, state: &StateCell) -> BridgeStats {
        state.set(LoopState::Running);
        info!(
            "Actuator bridge running at {:.1} Hz to {} ({:?}, {:?})",
            1.0 / self.rate.period().as_secs_f64(),
            self.sink.describe(),
            self.format,
            self.policy
        );

        while shutdown.should_continue() {
            self.rate.cycle_start();
            self.cycle();
            self.rate.cycle_end();
        }

        state.set(LoopState::Draining);
        info!(
            "Actuator bridge stopping, {} cycles, {} written, {} sink failures, {} overruns",
            self.stats.cycles, self.stats.written, self.stats.sink_failures, self.rate.num_overruns
        );

        self.stats
    }

    /// Work out which command this cycle should act on.
    fn target(&mut self, now: Instant) -> ControlCommand {
        let (cmd, received) = match self.held {
            Some(h) => h,
            None => return self.neutral,
        };

        match self.failsafe_timeout {
            Some(timeout) if now.saturating_duration_since(received) >= timeout => {
                if !self.failsafe_active {
                    warn!(
                        "No command received for {:?}, writing neutral until the link recovers",
                        timeout
                    );
                    self.failsafe_active = true;
                    self.stats.failsafe_activations += 1;
                }
                self.neutral
            }
            _ => cmd,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
