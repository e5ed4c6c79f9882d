//! Session state machine
//!
//! Tracks the lifecycle of one host or viewer session from the start
//! request to teardown.
//!
//! ```text
//! Idle -> Starting -> Active -> Stopping -> Stopped
//!            \          \          \
//!             +----------+----------+--> Failed
//! ```
//!
//! No phase is ever re-entered; `Stopped` and `Failed` are terminal.

use std::time::{Duration, Instant};

use super::context::{MatchInfo, Role};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No session exists
    Idle,
    /// Start/join accepted, transport being established
    Starting,
    /// Connected and serving or receiving
    Active,
    /// Teardown in progress
    Stopping,
    /// Torn down after an explicit stop
    Stopped,
    /// Torn down after a failure
    Failed,
}

impl SessionPhase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Stopped | SessionPhase::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, next) {
            (Idle, Starting) | (Starting, Active) | (Active, Stopping) | (Stopping, Stopped) => {
                true
            }
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Starting => "starting",
            SessionPhase::Active => "active",
            SessionPhase::Stopping => "stopping",
            SessionPhase::Stopped => "stopped",
            SessionPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Complete session state
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Host or viewer
    pub role: Role,

    /// Match identifiers (league/match are empty for a viewer until accepted)
    pub info: MatchInfo,

    /// Current phase
    pub phase: SessionPhase,

    /// Every phase this session has been in, in order
    pub history: Vec<SessionPhase>,

    /// Time the start/join request was accepted
    pub created_at: Instant,

    /// Time the session reached Active
    pub activated_at: Option<Instant>,

    /// Reason for entering Failed
    pub failure: Option<String>,
}

impl SessionState {
    /// Create a new session state in `Idle`
    pub fn new(id: u64, role: Role, info: MatchInfo) -> Self {
        Self {
            id,
            role,
            info,
            phase: SessionPhase::Idle,
            history: vec![SessionPhase::Idle],
            created_at: Instant::now(),
            activated_at: None,
            failure: None,
        }
    }

    /// Move to `next` if the lifecycle allows it
    ///
    /// Returns false and leaves the state untouched otherwise.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            return false;
        }

        if next == SessionPhase::Active {
            self.activated_at = Some(Instant::now());
        }

        self.phase = next;
        self.history.push(next);
        true
    }

    /// Enter Failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.advance(SessionPhase::Failed) {
            self.failure = Some(reason.into());
            true
        } else {
            false
        }
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// Time spent Active so far
    pub fn active_duration(&self) -> Option<Duration> {
        self.activated_at.map(|t| t.elapsed())
    }
}
