//! Session transition table
//!
//! Every trigger the coordinator accepts is looked up here by
//! `(current state, trigger)`. A missing entry or an unsatisfied guard makes
//! the trigger a no-op. Side effects are listed as [`Action`]s which the
//! coordinator executes in order after committing `next_state`.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

use crate::location::TrackingAccuracy;
use crate::types::SessionState;

lazy_static! {
    /// The session table - single source of truth for all transitions
    pub static ref SESSION_TABLE: SessionStateTable = SessionStateTable::default_table();
}

/// Inputs that may move the session between states
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Trigger {
    /// User pressed and held the SOS control
    Initiate,
    /// Skip the countdown
    ActivateImmediately,
    /// Countdown reached zero
    CountdownElapsed,
    Cancel,
    BeginRecovery,
    /// User marked themselves safe
    CompleteRecovery,
    /// Recovery window expired without user action
    RecoveryTimeout,
}

/// Key for looking up transitions in the state table
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct StateKey {
    pub state: SessionState,
    pub trigger: Trigger,
}

impl StateKey {
    pub fn new(state: SessionState, trigger: Trigger) -> Self {
        Self { state, trigger }
    }
}

/// Conditions that must hold for a transition to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// User and device identity are configured
    HasIdentity,
    /// A record exists and the server has assigned its id
    RecordWithId,
    /// No complete-recovery call is already in flight
    NotClosing,
}

/// Facts the guards are evaluated against
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardContext {
    pub has_identity: bool,
    pub has_record_id: bool,
    pub closing: bool,
}

impl Guard {
    pub fn is_satisfied(&self, ctx: &GuardContext) -> bool {
        match self {
            Guard::HasIdentity => ctx.has_identity,
            Guard::RecordWithId => ctx.has_record_id,
            Guard::NotClosing => !ctx.closing,
        }
    }
}

/// Side effects executed after a transition commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Install a local record that the create response will replace
    CreateProvisionalRecord,
    StartCountdown,
    StopCountdown,
    RequestLocationAuthorization,
    StartTracking(TrackingAccuracy),
    StopTracking,
    /// Set `activationTime` unless already set
    StampActivation,
    CreateRecord,
    /// Activate now, or defer until the create call returns an id
    ActivateRecord,
    /// Cancel remotely, or reset immediately when there is no id
    CancelRecord,
    BeginRecoveryRemote,
    StopRecoveryTimer,
    CompleteRecoveryRemote,
}

/// Transition definition - what happens when a trigger arrives in a state
#[derive(Debug, Clone)]
pub struct Transition {
    pub guards: Vec<Guard>,
    pub actions: Vec<Action>,
    /// Next state (if changing)
    pub next_state: Option<SessionState>,
}

impl Transition {
    /// First guard that does not hold, if any
    pub fn failed_guard(&self, ctx: &GuardContext) -> Option<Guard> {
        self.guards.iter().copied().find(|g| !g.is_satisfied(ctx))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStateTable {
    transitions: HashMap<StateKey, Transition>,
}

impl SessionStateTable {
    pub fn new() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: StateKey, transition: Transition) {
        self.transitions.insert(key, transition);
    }

    pub fn get(&self, state: SessionState, trigger: Trigger) -> Option<&Transition> {
        self.transitions.get(&StateKey::new(state, trigger))
    }

    pub fn has_transition(&self, state: SessionState, trigger: Trigger) -> bool {
        self.transitions.contains_key(&StateKey::new(state, trigger))
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Check that every state a transition can lead to has a way out.
    ///
    /// `Cancelled` is exempt: it is left by the reset that follows the
    /// remote cancel, not by a trigger.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut targets = HashSet::new();
        for transition in self.transitions.values() {
            if let Some(next) = transition.next_state {
                targets.insert(next);
            }
        }

        let errors: Vec<String> = targets
            .into_iter()
            .filter(|state| *state != SessionState::Cancelled)
            .filter(|state| !self.transitions.keys().any(|k| k.state == *state))
            .map(|state| format!("State {:?} has no exit transitions", state))
            .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// The built-in emergency session table
    pub fn default_table() -> Self {
        use Action::*;
        use SessionState::*;

        let mut table = Self::new();

        table.insert(
            StateKey::new(Inactive, Trigger::Initiate),
            Transition {
                guards: vec![Guard::HasIdentity],
                actions: vec![
                    CreateProvisionalRecord,
                    StartCountdown,
                    RequestLocationAuthorization,
                    StartTracking(TrackingAccuracy::Standard),
                    CreateRecord,
                ],
                next_state: Some(Pending),
            },
        );

        table.insert(
            StateKey::new(Inactive, Trigger::ActivateImmediately),
            Transition {
                guards: vec![Guard::HasIdentity],
                actions: vec![
                    CreateProvisionalRecord,
                    StampActivation,
                    RequestLocationAuthorization,
                    StartTracking(TrackingAccuracy::HighAccuracy),
                    CreateRecord,
                    ActivateRecord,
                ],
                next_state: Some(Active),
            },
        );

        table.insert(
            StateKey::new(Pending, Trigger::CountdownElapsed),
            Transition {
                guards: vec![],
                actions: vec![
                    StopCountdown,
                    StampActivation,
                    StartTracking(TrackingAccuracy::HighAccuracy),
                    ActivateRecord,
                ],
                next_state: Some(Active),
            },
        );

        table.insert(
            StateKey::new(Pending, Trigger::Cancel),
            Transition {
                guards: vec![],
                actions: vec![StopCountdown, StopTracking, CancelRecord],
                next_state: Some(Cancelled),
            },
        );

        table.insert(
            StateKey::new(Active, Trigger::BeginRecovery),
            Transition {
                guards: vec![Guard::RecordWithId],
                actions: vec![BeginRecoveryRemote],
                next_state: Some(Recovering),
            },
        );

        // Completion keeps the current state until the remote call returns;
        // the reset that follows is unconditional.
        let complete = Transition {
            guards: vec![Guard::RecordWithId, Guard::NotClosing],
            actions: vec![StopRecoveryTimer, StopTracking, CompleteRecoveryRemote],
            next_state: None,
        };
        table.insert(StateKey::new(Active, Trigger::CompleteRecovery), complete.clone());
        table.insert(StateKey::new(Recovering, Trigger::CompleteRecovery), complete.clone());
        table.insert(StateKey::new(Recovering, Trigger::RecoveryTimeout), complete);

        table
    }
}
