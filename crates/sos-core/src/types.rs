//! Session data model
//!
//! The record shapes here are shared by persistence, the remote API and the
//! companion wire format, so their serialized field names are fixed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{SessionError, SessionResult};

/// Server-assigned identifier of an emergency record
pub type EmergencyId = i64;

/// Lifecycle state of the emergency session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No emergency in progress
    #[default]
    Inactive,
    /// Countdown running, activation not yet requested
    Pending,
    /// Emergency services contacted
    Active,
    /// Held only while a remote cancel is in flight; always ends in a reset
    Cancelled,
    /// Post-emergency recovery window
    Recovering,
}

impl SessionState {
    /// Pending, Active or Recovering
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Pending | SessionState::Active | SessionState::Recovering
        )
    }

    /// Position along Pending, Active, Recovering; `None` outside a live session.
    ///
    /// A live session only ever moves forward along this order.
    pub fn progress(&self) -> Option<u8> {
        match self {
            SessionState::Pending => Some(0),
            SessionState::Active => Some(1),
            SessionState::Recovering => Some(2),
            SessionState::Inactive | SessionState::Cancelled => None,
        }
    }

    /// True when moving from `self` to `next` would rewind a live session
    pub fn would_rewind(&self, next: SessionState) -> bool {
        matches!((self.progress(), next.progress()), (Some(from), Some(to)) if to < from)
    }

    /// Persisted/wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Inactive => "INACTIVE",
            SessionState::Pending => "PENDING",
            SessionState::Active => "ACTIVE",
            SessionState::Cancelled => "CANCELLED",
            SessionState::Recovering => "RECOVERING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        match s {
            "INACTIVE" => Ok(SessionState::Inactive),
            "PENDING" => Ok(SessionState::Pending),
            "ACTIVE" => Ok(SessionState::Active),
            "CANCELLED" => Ok(SessionState::Cancelled),
            "RECOVERING" => Ok(SessionState::Recovering),
            other => Err(SessionError::serialization(format!(
                "unknown session state tag: {}",
                other
            ))),
        }
    }
}

/// Which device class created the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceOrigin {
    #[default]
    #[serde(rename = "PRIMARY", alias = "PHONE")]
    Primary,
    #[serde(rename = "COMPANION", alias = "WATCH")]
    Companion,
}

impl DeviceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOrigin::Primary => "PRIMARY",
            DeviceOrigin::Companion => "COMPANION",
        }
    }
}

impl fmt::Display for DeviceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceOrigin {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" | "PHONE" => Ok(DeviceOrigin::Primary),
            "COMPANION" | "WATCH" => Ok(DeviceOrigin::Companion),
            other => Err(SessionError::serialization(format!(
                "unknown device origin: {}",
                other
            ))),
        }
    }
}

/// The emergency record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencySession {
    /// Absent until the server assigns one
    #[serde(default)]
    pub id: Option<EmergencyId>,
    pub user_id: i64,
    pub device_id: String,
    pub state: SessionState,
    #[serde(default)]
    pub initiation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_location_update: Option<DateTime<Utc>>,
    #[serde(default, alias = "currentLatitude")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "currentLongitude")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub activation_method: Option<String>,
    /// Owned by the server
    #[serde(default)]
    pub contacts_notified: bool,
    #[serde(default)]
    pub recovery_attempts: u32,
    #[serde(default)]
    pub emergency_type: Option<String>,
    pub device_origin: DeviceOrigin,
}

impl EmergencySession {
    /// Local record for a session whose create call has not returned yet
    pub fn provisional(
        user_id: i64,
        device_id: impl Into<String>,
        device_origin: DeviceOrigin,
        emergency_type: impl Into<String>,
        activation_method: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id,
            device_id: device_id.into(),
            state: SessionState::Pending,
            initiation_time: Some(Utc::now()),
            activation_time: None,
            last_location_update: None,
            latitude: None,
            longitude: None,
            activation_method: Some(activation_method.into()),
            contacts_notified: false,
            recovery_attempts: 0,
            emergency_type: Some(emergency_type.into()),
            device_origin,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Carry forward the set-once and monotonic fields of `previous`.
    ///
    /// Timestamps already established locally are never rewound by a server
    /// copy, and the recovery attempt counter never decreases.
    pub fn merge_from(&mut self, previous: &EmergencySession) {
        if previous.initiation_time.is_some() {
            self.initiation_time = previous.initiation_time;
        }
        if previous.activation_time.is_some() {
            self.activation_time = previous.activation_time;
        }
        self.recovery_attempts = self.recovery_attempts.max(previous.recovery_attempts);
        if self.latitude.is_none() && self.longitude.is_none() {
            self.latitude = previous.latitude;
            self.longitude = previous.longitude;
            self.last_location_update = self.last_location_update.or(previous.last_location_update);
        }
    }
}

/// A location fix as reported by a [`LocationSource`](crate::LocationSource)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: Utc::now(),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Coordinates attached to activation and location-update requests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Message exchanged with the companion device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionMessage {
    pub emergency_state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<EmergencyId>,
}

impl CompanionMessage {
    pub fn new(emergency_state: SessionState, context_id: Option<EmergencyId>) -> Self {
        Self {
            emergency_state,
            context_id,
        }
    }

    /// Encode as the JSON dictionary carried by the device channel
    pub fn to_payload(&self) -> SessionResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON dictionary received from the device channel
    pub fn from_payload(payload: &str) -> SessionResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Observable view of the coordinator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session: Option<EmergencySession>,
    pub countdown_remaining: u32,
    pub is_processing_request: bool,
    pub last_error: Option<crate::SessionError>,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn session_id(&self) -> Option<EmergencyId> {
        self.session.as_ref().and_then(|s| s.id)
    }
}
