//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{SessionError, SessionResult};
use crate::recovery::RetryConfig;
use crate::types::DeviceOrigin;

/// How outbound companion messages are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPreference {
    /// Try immediate delivery, fall back to the queue on any failure
    ImmediateFirst,
    /// Queue directly whenever the peer is not reachable
    ReachabilityChecked,
}

impl DeliveryPreference {
    /// Role default
    pub fn for_origin(origin: DeviceOrigin) -> Self {
        match origin {
            DeviceOrigin::Primary => DeliveryPreference::ImmediateFirst,
            DeviceOrigin::Companion => DeliveryPreference::ReachabilityChecked,
        }
    }
}

/// Configuration for the session coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Authenticated user, required to create a session
    pub user_id: Option<i64>,
    /// Stable identifier of this device, required to create a session
    pub device_id: Option<String>,
    pub device_origin: DeviceOrigin,
    /// Overrides the role default when set
    pub delivery_preference: Option<DeliveryPreference>,
    /// Number of countdown ticks, the first fires immediately
    pub countdown_ticks: u32,
    pub countdown_interval_ms: u64,
    pub recovery_window_secs: u64,
    /// Delay before re-verifying a restored session after a failure
    pub reconnect_delay_secs: u64,
    /// Bound on every remote call
    pub request_timeout_secs: u64,
    /// Attempts for create and activate, including the first
    pub max_request_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub emergency_type: String,
    /// Activation method reported for a countdown-initiated session
    pub initiate_method: String,
    /// Activation method reported for an immediate activation
    pub immediate_method: String,
}

impl CoordinatorConfig {
    /// Create a new coordinator configuration with defaults
    pub fn new() -> Self {
        Self {
            user_id: None,
            device_id: None,
            device_origin: DeviceOrigin::Primary,
            delivery_preference: None,
            countdown_ticks: 3,
            countdown_interval_ms: 1000,
            recovery_window_secs: 30 * 60,
            reconnect_delay_secs: 30,
            request_timeout_secs: 15,
            max_request_attempts: 3,
            retry_initial_delay_ms: 500,
            emergency_type: "SAFETY".to_string(),
            initiate_method: "BUTTON_HOLD".to_string(),
            immediate_method: "SOS_BUTTON".to_string(),
        }
    }

    pub fn with_identity(mut self, user_id: i64, device_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_device_origin(mut self, origin: DeviceOrigin) -> Self {
        self.device_origin = origin;
        self
    }

    pub fn with_delivery_preference(mut self, preference: DeliveryPreference) -> Self {
        self.delivery_preference = Some(preference);
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_max_request_attempts(mut self, attempts: u32) -> Self {
        self.max_request_attempts = attempts.max(1);
        self
    }

    pub fn with_emergency_type(mut self, emergency_type: impl Into<String>) -> Self {
        self.emergency_type = emergency_type.into();
        self
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn delivery(&self) -> DeliveryPreference {
        self.delivery_preference
            .unwrap_or_else(|| DeliveryPreference::for_origin(self.device_origin))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_request_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            ..RetryConfig::default()
        }
    }

    /// Reject values the coordinator's timers cannot run with
    pub fn validate(&self) -> SessionResult<()> {
        if self.countdown_interval_ms == 0 {
            return Err(SessionError::invalid_configuration(
                "countdown_interval_ms must be greater than zero",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(SessionError::invalid_configuration(
                "request_timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
