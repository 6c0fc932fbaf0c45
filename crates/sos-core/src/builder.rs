//! Builder for starting a session coordinator

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::info;

use crate::companion::{CompanionChannel, CompanionLink};
use crate::config::CoordinatorConfig;
use crate::coordinator::{Collaborators, SessionCoordinator};
use crate::error::{SessionError, SessionResult};
use crate::handle::CoordinatorHandle;
use crate::location::{LocationSource, ManualLocationSource};
use crate::service::EmergencyService;
use crate::store::{KeyValueStore, MemoryStore, SnapshotStore};
use crate::types::{DeviceOrigin, SessionSnapshot};

/// Builder for a [`CoordinatorHandle`].
///
/// Only the emergency service is required. The store defaults to a
/// [`MemoryStore`] and the location source to an idle
/// [`ManualLocationSource`]; without a companion channel nothing is
/// replicated.
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    service: Option<Arc<dyn EmergencyService>>,
    store: Option<Arc<dyn KeyValueStore>>,
    location: Option<Arc<dyn LocationSource>>,
    companion: Option<Arc<dyn CompanionChannel>>,
    link: Option<CompanionLink>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            service: None,
            store: None,
            location: None,
            companion: None,
            link: None,
        }
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the user and device identity
    pub fn identity(mut self, user_id: i64, device_id: impl Into<String>) -> Self {
        self.config.user_id = Some(user_id);
        self.config.device_id = Some(device_id.into());
        self
    }

    pub fn device_origin(mut self, origin: DeviceOrigin) -> Self {
        self.config.device_origin = origin;
        self
    }

    pub fn service(mut self, service: Arc<dyn EmergencyService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn location(mut self, location: Arc<dyn LocationSource>) -> Self {
        self.location = Some(location);
        self
    }

    /// Replicate over `channel`. Inbound messages must be routed to the
    /// handle's [`SessionUpdateSink`](crate::SessionUpdateSink) by the caller.
    pub fn companion(mut self, channel: Arc<dyn CompanionChannel>) -> Self {
        self.companion = Some(channel);
        self.link = None;
        self
    }

    /// Replicate over an in-process link and receive from it
    pub fn companion_link(mut self, link: CompanionLink) -> Self {
        self.companion = Some(Arc::new(link.clone()));
        self.link = Some(link);
        self
    }

    /// Restore any persisted session and start the coordinator task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> SessionResult<CoordinatorHandle> {
        let service = self
            .service
            .ok_or_else(|| SessionError::invalid_configuration("emergency service is required"))?;
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let location = self
            .location
            .unwrap_or_else(|| Arc::new(ManualLocationSource::new()));

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(256);

        info!(
            device_origin = %self.config.device_origin,
            delivery = ?self.config.delivery(),
            companion = self.companion.is_some(),
            "Starting session coordinator"
        );

        let mut coordinator = SessionCoordinator::new(
            self.config,
            Collaborators {
                service,
                store: SnapshotStore::new(store),
                location,
                companion: self.companion,
            },
            tx.clone(),
            snapshot_tx,
            events_tx.clone(),
        );
        coordinator.restore().await;
        tokio::spawn(coordinator.run(rx));

        let handle = CoordinatorHandle::new(tx, snapshot_rx, events_tx);
        if let Some(link) = self.link {
            link.attach(Arc::new(handle.clone()));
        }
        Ok(handle)
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
