//! Run lifecycle and abort signalling
//!
//! ```text
//! Running <-> DelayedEval
//!    |            |
//!    +--> Aborting <--+
//!    |        |
//!    +--> Completed
//!             |
//!          Stopped   (terminal, reached exactly once)
//! ```
//!
//! Every component that must react to an abort holds a clone of the
//! controller's [`CancellationToken`].

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Traffic flowing, nothing breached
    Running,
    /// At least one abort-eligible threshold is counting down
    DelayedEval,
    /// Abort requested; streams are draining
    Aborting,
    /// All streams finished their schedules
    Completed,
    /// Terminal
    Stopped,
}

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AbortCause {
    /// An abort-eligible threshold stayed breached past its delay
    Threshold {
        /// Metric selector
        metric: String,
        /// Threshold expression
        threshold: String,
        /// Elapsed run time when the abort fired
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
    /// Operator interrupt
    Interrupted,
    /// Internal fault (e.g. aggregation)
    Fault {
        /// Description
        message: String,
    },
}

impl AbortCause {
    /// True if the run was aborted by a threshold
    pub fn is_threshold(&self) -> bool {
        matches!(self, Self::Threshold { .. })
    }
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold {
                metric,
                threshold,
                elapsed,
            } => write!(
                f,
                "threshold `{threshold}` on {metric} failed at {:.1}s",
                elapsed.as_secs_f64()
            ),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Fault { message } => write!(f, "fault: {message}"),
        }
    }
}

/// How a run ended, yielded once by [`AbortController::stop`]
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// Schedules ran to completion
    Completed,
    /// Run was cut short
    Aborted(AbortCause),
}

#[derive(Debug)]
struct State {
    phase: RunPhase,
    cause: Option<AbortCause>,
}

/// Single writer of the run phase
#[derive(Debug)]
pub struct AbortController {
    state: Mutex<State>,
    token: CancellationToken,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    /// Create a controller in `Running`
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: RunPhase::Running,
                cause: None,
            }),
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled when the run aborts
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.state.lock().phase
    }

    /// Abort cause, if the run was aborted
    pub fn cause(&self) -> Option<AbortCause> {
        self.state.lock().cause.clone()
    }

    /// True once an abort has been accepted
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Move between `Running` and `DelayedEval` as countdowns start and stop
    ///
    /// Ignored in every other phase.
    pub fn set_countdown_pending(&self, pending: bool) {
        let mut state = self.state.lock();
        state.phase = match (state.phase, pending) {
            (RunPhase::Running, true) => RunPhase::DelayedEval,
            (RunPhase::DelayedEval, false) => RunPhase::Running,
            (phase, _) => phase,
        };
    }

    /// Request an abort
    ///
    /// Returns `true` only for the call that moved the run into `Aborting`;
    /// later requests are ignored and their cause discarded.
    pub fn abort(&self, cause: AbortCause) -> bool {
        let mut state = self.state.lock();
        if !matches!(state.phase, RunPhase::Running | RunPhase::DelayedEval) {
            return false;
        }
        tracing::warn!(cause = %cause, "aborting run");
        state.phase = RunPhase::Aborting;
        state.cause = Some(cause);
        self.token.cancel();
        true
    }

    /// Mark every schedule as finished
    ///
    /// Returns `false` if the run was already aborting or stopped.
    pub fn complete(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(state.phase, RunPhase::Running | RunPhase::DelayedEval) {
            return false;
        }
        state.phase = RunPhase::Completed;
        true
    }

    /// Enter `Stopped`
    ///
    /// Yields the termination exactly once; every later call returns `None`.
    pub fn stop(&self) -> Option<Termination> {
        let mut state = self.state.lock();
        let termination = match state.phase {
            RunPhase::Stopped => return None,
            RunPhase::Aborting => match state.cause.clone() {
                Some(cause) => Termination::Aborted(cause),
                None => Termination::Completed,
            },
            RunPhase::Running | RunPhase::DelayedEval | RunPhase::Completed => {
                Termination::Completed
            }
        };
        state.phase = RunPhase::Stopped;
        Some(termination)
    }
}
