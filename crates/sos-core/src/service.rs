//! Remote emergency service contract
//!
//! Every operation returns the full, authoritative record on success. The
//! HTTP implementation lives in `sosync-api-client`; [`InMemoryEmergencyService`]
//! keeps records in process and supports fault injection.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::events::Operation;
use crate::types::{Coordinates, DeviceOrigin, EmergencyId, EmergencySession, SessionState};

/// Body of the create call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmergencyRequest {
    pub user_id: i64,
    pub device_id: String,
    pub device_origin: DeviceOrigin,
    pub emergency_type: String,
    pub activation_method: String,
}

#[async_trait]
pub trait EmergencyService: Send + Sync {
    async fn create(&self, request: &CreateEmergencyRequest) -> SessionResult<EmergencySession>;

    /// Coordinates are omitted when no fix is known
    async fn activate(
        &self,
        id: EmergencyId,
        coordinates: Option<Coordinates>,
    ) -> SessionResult<EmergencySession>;

    async fn cancel(&self, id: EmergencyId) -> SessionResult<EmergencySession>;

    async fn begin_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession>;

    async fn complete_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession>;

    async fn update_location(
        &self,
        id: EmergencyId,
        coordinates: Coordinates,
    ) -> SessionResult<EmergencySession>;

    async fn fetch(&self, id: EmergencyId) -> SessionResult<EmergencySession>;
}

#[derive(Debug, Default)]
struct Backend {
    next_id: EmergencyId,
    records: HashMap<EmergencyId, EmergencySession>,
    failures: HashMap<Operation, Vec<SessionError>>,
    delays: HashMap<Operation, Duration>,
    calls: Vec<(Operation, Option<EmergencyId>)>,
    last_activation: Option<Option<Coordinates>>,
}

/// Shared in-process backend.
///
/// Clones share the same records, so two coordinators built over clones see
/// one authority. Injected failures are consumed in order, one per call.
#[derive(Debug, Clone)]
pub struct InMemoryEmergencyService {
    inner: Arc<Mutex<Backend>>,
}

impl InMemoryEmergencyService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Backend {
                next_id: 1,
                ..Backend::default()
            })),
        }
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: Operation, error: SessionError) {
        self.inner
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push(error);
    }

    /// Delay every call of `operation`
    pub fn set_delay(&self, operation: Operation, delay: Duration) {
        self.inner.lock().delays.insert(operation, delay);
    }

    pub fn clear_delay(&self, operation: Operation) {
        self.inner.lock().delays.remove(&operation);
    }

    /// Server-side state change, as if another client or an operator did it
    pub fn set_state(&self, id: EmergencyId, state: SessionState) {
        if let Some(record) = self.inner.lock().records.get_mut(&id) {
            record.state = state;
        }
    }

    /// Seed a record, keeping its id
    pub fn insert(&self, session: EmergencySession) {
        let mut backend = self.inner.lock();
        if let Some(id) = session.id {
            backend.next_id = backend.next_id.max(id + 1);
            backend.records.insert(id, session);
        }
    }

    pub fn record(&self, id: EmergencyId) -> Option<EmergencySession> {
        self.inner.lock().records.get(&id).cloned()
    }

    /// Number of calls made for `operation`, failed ones included
    pub fn call_count(&self, operation: Operation) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// Coordinates passed to the most recent activation
    pub fn last_activation(&self) -> Option<Option<Coordinates>> {
        self.inner.lock().last_activation
    }

    async fn enter(&self, operation: Operation, id: Option<EmergencyId>) -> SessionResult<()> {
        let delay = {
            let mut backend = self.inner.lock();
            backend.calls.push((operation, id));
            backend.delays.get(&operation).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut backend = self.inner.lock();
        match backend.failures.get_mut(&operation) {
            Some(queue) if !queue.is_empty() => Err(queue.remove(0)),
            _ => Ok(()),
        }
    }

    fn update<F>(&self, id: EmergencyId, f: F) -> SessionResult<EmergencySession>
    where
        F: FnOnce(&mut EmergencySession),
    {
        let mut backend = self.inner.lock();
        let record = backend
            .records
            .get_mut(&id)
            .ok_or(SessionError::ServerError { status: 404 })?;
        f(record);
        Ok(record.clone())
    }
}

impl Default for InMemoryEmergencyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmergencyService for InMemoryEmergencyService {
    async fn create(&self, request: &CreateEmergencyRequest) -> SessionResult<EmergencySession> {
        self.enter(Operation::Create, None).await?;
        let mut backend = self.inner.lock();
        let id = backend.next_id;
        backend.next_id += 1;

        let mut record = EmergencySession::provisional(
            request.user_id,
            request.device_id.clone(),
            request.device_origin,
            request.emergency_type.clone(),
            request.activation_method.clone(),
        );
        record.id = Some(id);
        debug!(session_id = id, "In-memory backend created record");
        backend.records.insert(id, record.clone());
        Ok(record)
    }

    async fn activate(
        &self,
        id: EmergencyId,
        coordinates: Option<Coordinates>,
    ) -> SessionResult<EmergencySession> {
        self.enter(Operation::Activate, Some(id)).await?;
        self.inner.lock().last_activation = Some(coordinates);
        self.update(id, |record| {
            record.state = SessionState::Active;
            record.activation_time.get_or_insert_with(Utc::now);
            record.contacts_notified = true;
            if let Some(c) = coordinates {
                record.latitude = Some(c.latitude);
                record.longitude = Some(c.longitude);
                record.last_location_update = Some(Utc::now());
            }
        })
    }

    async fn cancel(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.enter(Operation::Cancel, Some(id)).await?;
        self.update(id, |record| record.state = SessionState::Cancelled)
    }

    async fn begin_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.enter(Operation::BeginRecovery, Some(id)).await?;
        self.update(id, |record| {
            record.state = SessionState::Recovering;
            record.recovery_attempts += 1;
        })
    }

    async fn complete_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.enter(Operation::CompleteRecovery, Some(id)).await?;
        self.update(id, |record| record.state = SessionState::Inactive)
    }

    async fn update_location(
        &self,
        id: EmergencyId,
        coordinates: Coordinates,
    ) -> SessionResult<EmergencySession> {
        self.enter(Operation::UpdateLocation, Some(id)).await?;
        self.update(id, |record| {
            record.latitude = Some(coordinates.latitude);
            record.longitude = Some(coordinates.longitude);
            record.last_location_update = Some(Utc::now());
        })
    }

    async fn fetch(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.enter(Operation::Fetch, Some(id)).await?;
        self.update(id, |_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateEmergencyRequest {
        CreateEmergencyRequest {
            user_id: 3,
            device_id: "device-a".to_string(),
            device_origin: DeviceOrigin::Primary,
            emergency_type: "SAFETY".to_string(),
            activation_method: "BUTTON_HOLD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_on_backend() {
        let service = InMemoryEmergencyService::new();
        let created = service.create(&request()).await.unwrap();
        let id = created.id.unwrap();
        assert_eq!(created.state, SessionState::Pending);

        let coords = Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        };
        let active = service.activate(id, Some(coords)).await.unwrap();
        assert_eq!(active.state, SessionState::Active);
        assert!(active.activation_time.is_some());
        assert_eq!(service.last_activation(), Some(Some(coords)));

        let recovering = service.begin_recovery(id).await.unwrap();
        assert_eq!(recovering.recovery_attempts, 1);

        let done = service.complete_recovery(id).await.unwrap();
        assert_eq!(done.state, SessionState::Inactive);
        assert_eq!(service.call_count(Operation::Activate), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let service = InMemoryEmergencyService::new();
        service.fail_next(Operation::Create, SessionError::ServerError { status: 503 });
        service.fail_next(Operation::Create, SessionError::NoData);

        assert_eq!(
            service.create(&request()).await,
            Err(SessionError::ServerError { status: 503 })
        );
        assert_eq!(service.create(&request()).await, Err(SessionError::NoData));
        assert!(service.create(&request()).await.is_ok());
        assert_eq!(service.call_count(Operation::Create), 3);
    }

    #[tokio::test]
    async fn test_unknown_record_is_not_found() {
        let service = InMemoryEmergencyService::new();
        assert_eq!(
            service.fetch(99).await,
            Err(SessionError::ServerError { status: 404 })
        );
    }
}
