//! Location source contract and a manually driven implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Location;

/// Requested fix quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingAccuracy {
    /// Countdown phase, battery friendly
    Standard,
    /// Active emergency
    HighAccuracy,
}

/// Provider of location fixes.
///
/// The coordinator only consumes "latest fix, if any" and a stream of new
/// fixes; how they are obtained is up to the implementation.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Ask for permission to track. Must be safe to call repeatedly.
    async fn request_authorization(&self);

    async fn start_tracking(&self, accuracy: TrackingAccuracy);

    async fn stop_tracking(&self);

    fn last_location(&self) -> Option<Location>;

    /// New fixes published after this call
    fn subscribe(&self) -> broadcast::Receiver<Location>;
}

#[derive(Debug, Default)]
struct ManualState {
    authorized: bool,
    tracking: Option<TrackingAccuracy>,
    last: Option<Location>,
}

/// A location source fed by [`ManualLocationSource::push`].
///
/// Fixes are recorded as the latest location regardless of tracking, but are
/// only published to subscribers while tracking is on.
#[derive(Clone)]
pub struct ManualLocationSource {
    state: Arc<RwLock<ManualState>>,
    tx: broadcast::Sender<Location>,
}

impl ManualLocationSource {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            state: Arc::new(RwLock::new(ManualState::default())),
            tx,
        }
    }

    /// Start with a known fix
    pub fn with_location(location: Location) -> Self {
        let source = Self::new();
        source.state.write().last = Some(location);
        source
    }

    /// Feed a new fix
    pub fn push(&self, location: Location) {
        let tracking = {
            let mut state = self.state.write();
            state.last = Some(location);
            state.tracking.is_some()
        };
        if tracking {
            let _ = self.tx.send(location);
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state.read().authorized
    }

    /// Current tracking mode, `None` when stopped
    pub fn tracking(&self) -> Option<TrackingAccuracy> {
        self.state.read().tracking
    }
}

impl Default for ManualLocationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for ManualLocationSource {
    async fn request_authorization(&self) {
        let mut state = self.state.write();
        if !state.authorized {
            debug!("Location authorization granted");
            state.authorized = true;
        }
    }

    async fn start_tracking(&self, accuracy: TrackingAccuracy) {
        debug!(?accuracy, "Location tracking started");
        self.state.write().tracking = Some(accuracy);
    }

    async fn stop_tracking(&self) {
        if self.state.write().tracking.take().is_some() {
            debug!("Location tracking stopped");
        }
    }

    fn last_location(&self) -> Option<Location> {
        self.state.read().last
    }

    fn subscribe(&self) -> broadcast::Receiver<Location> {
        self.tx.subscribe()
    }
}
