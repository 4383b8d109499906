//! # Task management
//!
//! Every long running loop in the executables runs on its own named thread. Loops are cancelled
//! cooperatively: each one checks a shared [`Shutdown`] token once per iteration, and the owner
//! joins it with a bounded wait. Each loop publishes its [`LoopState`] so that the owner can see
//! what it is doing.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval at which a join polls for the thread finishing.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A cancellation token shared between the owner and its loops.
#[derive(Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

/// Shared view of a loop's [`LoopState`].
#[derive(Clone)]
pub struct StateCell {
    state: Arc<AtomicU8>,
}

/// A loop running on its own thread.
pub struct LoopTask<R> {
    name: String,
    handle: JoinHandle<R>,
    state: StateCell,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The lifecycle state of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    /// Acquiring resources
    Initializing,

    /// Running iterations
    Running,

    /// Shutdown requested, releasing resources
    Draining,

    /// Returned
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Could not spawn the {0} thread: {1}")]
    SpawnError(String, std::io::Error),

    #[error("The {0} thread panicked")]
    Panicked(String),

    #[error("The {0} thread did not stop within {1:?}")]
    JoinTimeout(String, Duration),

    #[error("Could not install the interrupt handler: {0}")]
    SignalError(ctrlc::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that all loops sharing this token stop.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Returns true while no shutdown has been requested.
    pub fn should_continue(&self) -> bool {
        !self.is_requested()
    }

    /// Request shutdown when the process receives an interrupt (Ctrl-C).
    ///
    /// This may only be called once per process.
    pub fn install_interrupt_handler(&self) -> Result<(), TaskError> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            info!("Interrupt received, shutting down");
            token.request();
        })
        .map_err(TaskError::SignalError)
    }

    /// Sleep for up to `duration`, returning early if shutdown is requested.
    pub fn sleep(&self, duration: Duration) {
        let end = Instant::now() + duration;
        while self.should_continue() {
            let now = Instant::now();
            if now >= end {
                break;
            }
            thread::sleep((end - now).min(JOIN_POLL_INTERVAL));
        }
    }
}

impl StateCell {
    pub fn new(state: LoopState) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(state as u8)),
        }
    }

    pub fn get(&self) -> LoopState {
        match self.state.load(Ordering::SeqCst) {
            0 => LoopState::Initializing,
            1 => LoopState::Running,
            2 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }

    pub fn set(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(LoopState::Initializing)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<R: Send + 'static> LoopTask<R> {
    /// Spawn a loop on a named thread.
    ///
    /// The loop is given the state cell to update as it runs. The state is set to
    /// [`LoopState::Stopped`] once the loop returns, even if the loop did not do so itself.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, TaskError>
    where
        F: FnOnce(&StateCell) -> R + Send + 'static,
    {
        let state = StateCell::default();
        let thread_state = state.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let r = body(&thread_state);
                thread_state.set(LoopState::Stopped);
                r
            })
            .map_err(|e| TaskError::SpawnError(name.to_string(), e))?;

        debug!("Spawned {} thread", name);

        Ok(Self {
            name: name.to_string(),
            handle,
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Returns true if the loop has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the loop to return.
    ///
    /// If the loop does not return in time the thread is detached and an error returned.
    pub fn join_timeout(self, timeout: Duration) -> Result<R, TaskError> {
        let start = Instant::now();

        while !self.handle.is_finished() {
            if start.elapsed() >= timeout {
                warn!(
                    "{} thread still {} after {:?}, detaching",
                    self.name,
                    self.state(),
                    timeout
                );
                return Err(TaskError::JoinTimeout(self.name, timeout));
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        let name = self.name;
        self.handle.join().map_err(|_| TaskError::Panicked(name))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
