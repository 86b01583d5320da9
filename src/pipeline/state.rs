//! Session state management

/// Session state machine
///
/// `Created → Initializing → Active → Draining → Closed`, with `Failed`
/// reachable from every non-terminal state. Transitions are validated so the
/// orchestrator, the dispatcher and the supervisor agree on one history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, no network resources allocated
    Created,

    /// Transport handshake in progress
    Initializing,

    /// Audio may be sent and frames pulled
    Active,

    /// Stop requested, no new audio accepted, queues still drainable
    Draining,

    /// Transport released; terminal
    Closed,

    /// Released after an unrecoverable error; terminal
    Failed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Created, Initializing) => true,

            (Initializing, Active) => true,
            (Initializing, Draining) => true, // stop during handshake

            (Active, Draining) => true,

            (Draining, Closed) => true,

            // Failed is reachable from any non-terminal state
            (Created | Initializing | Active | Draining, Failed) => true,

            // nothing leaves a terminal state
            (Closed | Failed, _) => false,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Created => "Created",
            SessionState::Initializing => "Initializing",
            SessionState::Active => "Active",
            SessionState::Draining => "Draining",
            SessionState::Closed => "Closed",
            SessionState::Failed => "Failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// Closed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Stop already requested or completed
    pub fn is_stopping(&self) -> bool {
        matches!(self, SessionState::Draining) || self.is_terminal()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Why a session left `Active`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit `stop()` by the caller
    Requested,
    /// `max_session_length` elapsed since start
    SessionLengthExceeded,
    /// `max_idle_time` elapsed since the last send or dequeue
    IdleTimeExceeded,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::SessionLengthExceeded => write!(f, "max session length reached"),
            StopReason::IdleTimeExceeded => write!(f, "max idle time reached"),
        }
    }
}
