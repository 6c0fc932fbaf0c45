//! Events emitted by the session coordinator
//!
//! Observers either read the latest [`SessionSnapshot`](crate::SessionSnapshot)
//! through a watch channel or subscribe to the ordered stream of
//! [`SessionEvent`]s described here.

use chrono::{DateTime, Utc};

use crate::error::SessionError;
use crate::types::{EmergencyId, EmergencySession, SessionState};

/// Remote or local operation a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Activate,
    Cancel,
    BeginRecovery,
    CompleteRecovery,
    UpdateLocation,
    /// Startup verification or companion-announced fetch
    Fetch,
    Persist,
    Replicate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Activate => "activate",
            Operation::Cancel => "cancel",
            Operation::BeginRecovery => "begin_recovery",
            Operation::CompleteRecovery => "complete_recovery",
            Operation::UpdateLocation => "update_location",
            Operation::Fetch => "fetch",
            Operation::Persist => "persist",
            Operation::Replicate => "replicate",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a state change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A local trigger or timer
    Local,
    /// An authoritative server record
    Server,
    /// An announcement from the paired device
    Companion,
}

/// Event priority levels for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Countdown ticks and routine record refreshes
    Low,
    /// State changes
    Normal,
    /// Failures
    High,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        previous: SessionState,
        current: SessionState,
        source: ChangeSource,
        timestamp: DateTime<Utc>,
    },
    /// A server record was adopted
    SessionUpdated { session: EmergencySession },
    CountdownTick { remaining: u32 },
    RequestFailed {
        operation: Operation,
        error: SessionError,
    },
    /// The session was discarded and the snapshot erased
    Reset { session_id: Option<EmergencyId> },
}

impl SessionEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            SessionEvent::CountdownTick { .. } | SessionEvent::SessionUpdated { .. } => {
                EventPriority::Low
            }
            SessionEvent::StateChanged { .. } | SessionEvent::Reset { .. } => EventPriority::Normal,
            SessionEvent::RequestFailed { .. } => EventPriority::High,
        }
    }

    pub(crate) fn state_changed(
        previous: SessionState,
        current: SessionState,
        source: ChangeSource,
    ) -> Self {
        SessionEvent::StateChanged {
            previous,
            current,
            source,
            timestamp: Utc::now(),
        }
    }
}
