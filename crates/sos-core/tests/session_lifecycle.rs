//! Integration tests for the session lifecycle
//!
//! All tests run on a paused clock, so countdown, recovery and reconnect
//! timers complete instantly while still observing their durations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sosync_core::{
    CoordinatorBuilder, CoordinatorConfig, CoordinatorHandle, Coordinates,
    CreateEmergencyRequest, DeviceOrigin, EmergencyId, EmergencyService, EmergencySession,
    InMemoryEmergencyService, KeyValueStore, Location, ManualLocationSource,
    MemoryStore, Operation, SESSION_KEY, STATE_KEY, SessionError, SessionEvent, SessionResult,
    SessionSnapshot, SessionState, SnapshotStore, TrackingAccuracy,
};
use tokio::time::{Instant, sleep};

struct Fixture {
    handle: CoordinatorHandle,
    service: InMemoryEmergencyService,
    store: MemoryStore,
    location: ManualLocationSource,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sosync_core=debug")
        .with_test_writer()
        .try_init();
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig::new().with_identity(42, "device-test")
}

async fn start_with(
    config: CoordinatorConfig,
    service: InMemoryEmergencyService,
    store: MemoryStore,
    location: ManualLocationSource,
) -> Fixture {
    init_tracing();
    let handle = CoordinatorBuilder::new()
        .config(config)
        .service(Arc::new(service.clone()))
        .store(Arc::new(store.clone()))
        .location(Arc::new(location.clone()))
        .build()
        .await
        .expect("Failed to build coordinator");
    Fixture {
        handle,
        service,
        store,
        location,
    }
}

async fn start(config: CoordinatorConfig) -> Fixture {
    start_with(
        config,
        InMemoryEmergencyService::new(),
        MemoryStore::new(),
        ManualLocationSource::new(),
    )
    .await
}

fn settled(state: SessionState) -> impl FnMut(&SessionSnapshot) -> bool {
    move |s| s.state == state && s.session_id().is_some() && !s.is_processing_request
}

/// Pending with the record created and the first tick applied
fn pending_ready(s: &SessionSnapshot) -> bool {
    s.state == SessionState::Pending
        && s.session_id().is_some()
        && !s.is_processing_request
        && s.countdown_remaining == 2
}

fn seeded_record(id: i64, state: SessionState) -> EmergencySession {
    let mut session =
        EmergencySession::provisional(42, "device-test", DeviceOrigin::Primary, "SAFETY", "BUTTON_HOLD");
    session.id = Some(id);
    session.state = state;
    session.activation_time = Some(chrono::Utc::now());
    session
}

#[tokio::test(start_paused = true)]
async fn test_countdown_ticks_three_times_then_activates() {
    let f = start(config()).await;
    let mut events = f.handle.subscribe_events();
    let started = Instant::now();

    f.handle.initiate();
    let snapshot = f.handle.wait_for(settled(SessionState::Active)).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(snapshot.countdown_remaining, 0);
    let session = snapshot.session.unwrap();
    assert!(session.activation_time.is_some());
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.activation_method.as_deref(), Some("BUTTON_HOLD"));
    assert_eq!(f.service.call_count(Operation::Activate), 1);
    assert_eq!(f.location.tracking(), Some(TrackingAccuracy::HighAccuracy));
    assert!(f.location.is_authorized());

    let mut ticks = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::CountdownTick { remaining } = event {
            ticks.push(remaining);
        }
    }
    assert_eq!(ticks, vec![2, 1, 0]);

    assert_eq!(f.store.get(STATE_KEY).await.unwrap().as_deref(), Some("ACTIVE"));
}

#[tokio::test(start_paused = true)]
async fn test_pending_after_initiate() {
    let f = start(config()).await;
    f.handle.initiate();

    let snapshot = f.handle.wait_for(pending_ready).await.unwrap();
    assert_eq!(f.location.tracking(), Some(TrackingAccuracy::Standard));

    let persisted = SnapshotStore::new(Arc::new(f.store.clone()))
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.0, SessionState::Pending);
    assert_eq!(persisted.1.id, snapshot.session_id());
}

#[tokio::test(start_paused = true)]
async fn test_triggers_with_failing_guards_are_ignored() {
    let f = start(config()).await;

    // Nothing to cancel, recover or complete yet
    f.handle.cancel();
    f.handle.begin_recovery();
    f.handle.complete_recovery();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(f.handle.snapshot(), SessionSnapshot::default());
    assert_eq!(f.service.total_calls(), 0);

    f.handle.initiate();
    let before = f.handle.wait_for(pending_ready).await.unwrap();

    f.handle.initiate();
    f.handle.activate_immediately();
    f.handle.begin_recovery();
    f.handle.complete_recovery();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(f.handle.snapshot(), before);
    assert_eq!(f.service.call_count(Operation::Create), 1);
    assert_eq!(f.service.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_identity_is_reported_without_transition() {
    let f = start(CoordinatorConfig::new()).await;
    f.handle.initiate();

    let snapshot = f.handle.wait_for(|s| s.last_error.is_some()).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Inactive);
    assert!(snapshot.session.is_none());
    assert_eq!(
        snapshot.last_error,
        Some(SessionError::missing_identity("userId"))
    );
    assert_eq!(f.service.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_id_resets_without_network_call() {
    let f = start(config()).await;
    f.service.set_delay(Operation::Create, Duration::from_secs(5));

    f.handle.initiate();
    f.handle.wait_for(|s| s.state == SessionState::Pending).await.unwrap();
    f.handle.cancel();

    let snapshot = f
        .handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
    assert!(snapshot.session.is_none());
    assert_eq!(snapshot.countdown_remaining, 0);
    assert!(f.store.is_empty());
    assert_eq!(f.service.call_count(Operation::Cancel), 0);
    assert_eq!(f.location.tracking(), None);

    // The late create is cleaned up on the server, locally nothing changes
    sleep(Duration::from_secs(6)).await;
    assert_eq!(f.service.call_count(Operation::Cancel), 1);
    assert_eq!(f.service.record(1).unwrap().state, SessionState::Cancelled);
    assert_eq!(f.handle.snapshot().state, SessionState::Inactive);
    assert_eq!(f.service.call_count(Operation::Activate), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_with_id_cancels_remotely() {
    let f = start(config()).await;
    let mut events = f.handle.subscribe_events();

    f.handle.initiate();
    let pending = f.handle.wait_for(settled(SessionState::Pending)).await.unwrap();
    let id = pending.session_id().unwrap();
    f.handle.cancel();

    let snapshot = f
        .handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
    assert!(snapshot.last_error.is_none());
    assert!(f.store.is_empty());
    assert_eq!(f.service.record(id).unwrap().state, SessionState::Cancelled);

    // Countdown stopped: no activation ever happens
    sleep(Duration::from_secs(5)).await;
    assert_eq!(f.service.call_count(Operation::Activate), 0);

    let mut saw_cancelled = false;
    let mut saw_reset = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged { current, .. } if current == SessionState::Cancelled => {
                saw_cancelled = true
            }
            SessionEvent::Reset { session_id } => {
                assert_eq!(session_id, Some(id));
                saw_reset = true;
            }
            _ => {}
        }
    }
    assert!(saw_cancelled);
    assert!(saw_reset);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_failure_is_masked() {
    let f = start(config()).await;
    f.service
        .fail_next(Operation::Cancel, SessionError::ServerError { status: 500 });

    f.handle.initiate();
    f.handle.wait_for(settled(SessionState::Pending)).await.unwrap();
    f.handle.cancel();

    let snapshot = f
        .handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
    assert!(snapshot.session.is_none());
    assert_eq!(snapshot.last_error, Some(SessionError::ServerError { status: 500 }));
    assert!(f.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_immediate_activation_with_location() {
    let location = ManualLocationSource::with_location(Location::new(48.8566, 2.3522));
    let f = start_with(
        config(),
        InMemoryEmergencyService::new(),
        MemoryStore::new(),
        location,
    )
    .await;

    f.handle.activate_immediately();
    let snapshot = f.handle.wait_for(settled(SessionState::Active)).await.unwrap();

    let session = snapshot.session.unwrap();
    assert_eq!(session.activation_method.as_deref(), Some("SOS_BUTTON"));
    assert!(session.activation_time.is_some());
    assert!(session.contacts_notified);
    assert_eq!(
        f.service.last_activation(),
        Some(Some(Coordinates {
            latitude: 48.8566,
            longitude: 2.3522
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_activation_without_location_omits_coordinates() {
    let f = start(config()).await;
    f.handle.activate_immediately();
    f.handle.wait_for(settled(SessionState::Active)).await.unwrap();
    assert_eq!(f.service.last_activation(), Some(None));
}

#[tokio::test(start_paused = true)]
async fn test_activation_deferred_until_create_returns() {
    let f = start(config()).await;
    f.service.set_delay(Operation::Create, Duration::from_secs(5));
    let started = Instant::now();

    f.handle.initiate();
    let early = f
        .handle
        .wait_for(|s| s.state == SessionState::Active)
        .await
        .unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert!(early.session_id().is_none());
    assert_eq!(f.service.call_count(Operation::Activate), 0);

    let snapshot = f.handle.wait_for(settled(SessionState::Active)).await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(f.service.call_count(Operation::Activate), 1);
    assert!(snapshot.session.unwrap().contacts_notified);
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_surfaces_and_retry_recovers() {
    let f = start(config()).await;
    f.service
        .fail_next(Operation::Create, SessionError::ServerError { status: 400 });

    f.handle.initiate();
    let failed = f
        .handle
        .wait_for(|s| s.last_error.is_some() && !s.is_processing_request)
        .await
        .unwrap();
    assert_eq!(failed.state, SessionState::Pending);
    assert!(failed.session_id().is_none());
    assert_eq!(failed.last_error, Some(SessionError::ServerError { status: 400 }));

    f.handle.retry();
    let snapshot = f.handle.wait_for(settled(SessionState::Active)).await.unwrap();
    assert!(snapshot.last_error.is_none());
    assert_eq!(f.service.call_count(Operation::Create), 2);
    assert_eq!(f.service.call_count(Operation::Activate), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_create_failure_is_retried() {
    let f = start(config()).await;
    f.service
        .fail_next(Operation::Create, SessionError::ServerError { status: 503 });

    f.handle.initiate();
    let snapshot = f.handle.wait_for(settled(SessionState::Pending)).await.unwrap();
    assert!(snapshot.last_error.is_none());
    assert_eq!(f.service.call_count(Operation::Create), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hung_activation_times_out() {
    let f = start(config().with_max_request_attempts(1)).await;
    f.service.set_delay(Operation::Activate, Duration::from_secs(600));

    f.handle.activate_immediately();
    let snapshot = f
        .handle
        .wait_for(|s| s.last_error.is_some() && !s.is_processing_request)
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Active);
    assert_eq!(
        snapshot.last_error,
        Some(SessionError::OperationTimeout { duration_ms: 15_000 })
    );

    f.service.clear_delay(Operation::Activate);
    f.handle.retry();
    let snapshot = f
        .handle
        .wait_for(|s| s.last_error.is_none() && !s.is_processing_request)
        .await
        .unwrap();
    assert!(snapshot.session.unwrap().contacts_notified);
}

#[tokio::test(start_paused = true)]
async fn test_complete_recovery_always_resets() {
    for fail in [false, true] {
        let f = start(config()).await;
        f.handle.activate_immediately();
        f.handle.wait_for(settled(SessionState::Active)).await.unwrap();

        f.handle.begin_recovery();
        let recovering = f
            .handle
            .wait_for(settled(SessionState::Recovering))
            .await
            .unwrap();
        assert_eq!(recovering.session.as_ref().unwrap().recovery_attempts, 1);
        assert_eq!(f.store.get(STATE_KEY).await.unwrap().as_deref(), Some("RECOVERING"));

        if fail {
            f.service.fail_next(
                Operation::CompleteRecovery,
                SessionError::network_error("connection reset"),
            );
        }
        f.handle.complete_recovery();

        let snapshot = f
            .handle
            .wait_for(|s| s.state == SessionState::Inactive)
            .await
            .unwrap();
        assert!(snapshot.session.is_none());
        assert!(f.store.get(STATE_KEY).await.unwrap().is_none());
        assert!(f.store.get(SESSION_KEY).await.unwrap().is_none());
        assert_eq!(f.location.tracking(), None);
        assert_eq!(snapshot.last_error.is_some(), fail);
        assert_eq!(f.service.call_count(Operation::CompleteRecovery), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovery_window_auto_completes() {
    let f = start(config()).await;
    f.handle.activate_immediately();
    f.handle.wait_for(settled(SessionState::Active)).await.unwrap();
    f.handle.begin_recovery();
    f.handle
        .wait_for(settled(SessionState::Recovering))
        .await
        .unwrap();
    let started = Instant::now();

    f.handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(30 * 60));
    assert_eq!(f.service.call_count(Operation::CompleteRecovery), 1);
}

#[tokio::test(start_paused = true)]
async fn test_begin_recovery_failure_keeps_local_recovery() {
    let f = start(config()).await;
    f.handle.activate_immediately();
    f.handle.wait_for(settled(SessionState::Active)).await.unwrap();

    f.service
        .fail_next(Operation::BeginRecovery, SessionError::ServerError { status: 502 });
    f.handle.begin_recovery();
    let snapshot = f
        .handle
        .wait_for(|s| s.last_error.is_some() && !s.is_processing_request)
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Recovering);

    // The recovery window still bounds the session
    f.handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_location_updates_are_pushed_while_active() {
    let f = start(config()).await;
    f.handle.activate_immediately();
    f.handle.wait_for(settled(SessionState::Active)).await.unwrap();

    f.location.push(Location::new(10.0, 20.0));
    let snapshot = f
        .handle
        .wait_for(|s| s.session.as_ref().and_then(|x| x.latitude) == Some(10.0))
        .await
        .unwrap();
    assert_eq!(snapshot.session.unwrap().longitude, Some(20.0));
    assert_eq!(f.service.call_count(Operation::UpdateLocation), 1);

    // Failures are ignored
    f.service
        .fail_next(Operation::UpdateLocation, SessionError::ServerError { status: 500 });
    f.location.push(Location::new(11.0, 21.0));
    sleep(Duration::from_millis(10)).await;
    assert!(f.handle.snapshot().last_error.is_none());
    assert_eq!(f.service.call_count(Operation::UpdateLocation), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restore_active_closed_on_server_resets() {
    let service = InMemoryEmergencyService::new();
    service.insert(seeded_record(5, SessionState::Inactive));
    let store = MemoryStore::new();
    SnapshotStore::new(Arc::new(store.clone()))
        .save(SessionState::Active, &seeded_record(5, SessionState::Active))
        .await
        .unwrap();

    let f = start_with(config(), service, store, ManualLocationSource::new()).await;
    assert_eq!(f.handle.snapshot().state, SessionState::Active);
    let mut events = f.handle.subscribe_events();

    let snapshot = f
        .handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
    assert!(snapshot.session.is_none());
    assert!(f.store.is_empty());

    let reset = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, SessionEvent::Reset { session_id: Some(5) }));
    assert!(reset);
}

#[tokio::test(start_paused = true)]
async fn test_restore_recovering_resumes_timer() {
    let service = InMemoryEmergencyService::new();
    service.insert(seeded_record(9, SessionState::Recovering));
    let store = MemoryStore::new();
    SnapshotStore::new(Arc::new(store.clone()))
        .save(SessionState::Recovering, &seeded_record(9, SessionState::Recovering))
        .await
        .unwrap();

    let f = start_with(config(), service, store, ManualLocationSource::new()).await;
    f.handle
        .wait_for(settled(SessionState::Recovering))
        .await
        .unwrap();
    assert_eq!(f.location.tracking(), Some(TrackingAccuracy::HighAccuracy));

    let started = Instant::now();
    f.handle
        .wait_for(|s| s.state == SessionState::Inactive)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(30 * 60));
    assert_eq!(f.service.call_count(Operation::CompleteRecovery), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restore_verification_retries_after_delay() {
    let service = InMemoryEmergencyService::new();
    service.insert(seeded_record(3, SessionState::Active));
    service.fail_next(Operation::Fetch, SessionError::network_error("offline"));
    service.fail_next(Operation::Fetch, SessionError::network_error("offline"));
    let store = MemoryStore::new();
    SnapshotStore::new(Arc::new(store.clone()))
        .save(SessionState::Active, &seeded_record(3, SessionState::Active))
        .await
        .unwrap();

    let started = Instant::now();
    let f = start_with(config(), service, store, ManualLocationSource::new()).await;

    let failed = f
        .handle
        .wait_for(|s| s.last_error.is_some())
        .await
        .unwrap();
    assert_eq!(failed.state, SessionState::Active);
    assert_eq!(failed.session_id(), Some(3));

    let snapshot = f
        .handle
        .wait_for(|s| s.last_error.is_none() && !s.is_processing_request)
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Active);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(f.service.call_count(Operation::Fetch), 3);
    assert_eq!(f.location.tracking(), Some(TrackingAccuracy::HighAccuracy));
}

/// Backend whose fetch answers with somebody else's record
struct WrongRecordOnFetch(InMemoryEmergencyService);

#[async_trait]
impl EmergencyService for WrongRecordOnFetch {
    async fn create(&self, request: &CreateEmergencyRequest) -> SessionResult<EmergencySession> {
        self.0.create(request).await
    }

    async fn activate(
        &self,
        id: EmergencyId,
        coordinates: Option<Coordinates>,
    ) -> SessionResult<EmergencySession> {
        self.0.activate(id, coordinates).await
    }

    async fn cancel(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.0.cancel(id).await
    }

    async fn begin_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.0.begin_recovery(id).await
    }

    async fn complete_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        self.0.complete_recovery(id).await
    }

    async fn update_location(
        &self,
        id: EmergencyId,
        coordinates: Coordinates,
    ) -> SessionResult<EmergencySession> {
        self.0.update_location(id, coordinates).await
    }

    async fn fetch(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        let mut record = self.0.fetch(id).await?;
        record.id = Some(id + 1);
        Ok(record)
    }
}

#[tokio::test(start_paused = true)]
async fn test_restore_rejects_mismatched_server_record() {
    init_tracing();
    let service = InMemoryEmergencyService::new();
    service.insert(seeded_record(5, SessionState::Recovering));
    let store = MemoryStore::new();
    SnapshotStore::new(Arc::new(store.clone()))
        .save(SessionState::Active, &seeded_record(5, SessionState::Active))
        .await
        .unwrap();

    let handle = CoordinatorBuilder::new()
        .config(config())
        .service(Arc::new(WrongRecordOnFetch(service.clone())))
        .store(Arc::new(store.clone()))
        .build()
        .await
        .unwrap();
    let mut events = handle.subscribe_events();

    let failed = handle
        .wait_for(|s| s.last_error.is_some() && !s.is_processing_request)
        .await
        .unwrap();
    assert!(matches!(
        failed.last_error,
        Some(SessionError::InvalidResponse { .. })
    ));
    // The foreign record's state was not taken over
    assert_eq!(failed.state, SessionState::Active);
    assert_eq!(failed.session_id(), Some(5));
    let (state, _) = SnapshotStore::new(Arc::new(store.clone()))
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, SessionState::Active);

    let changed = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, SessionEvent::StateChanged { .. }));
    assert!(!changed);
}

#[tokio::test(start_paused = true)]
async fn test_restore_pending_without_id_restarts_flow() {
    let store = MemoryStore::new();
    let mut pending =
        EmergencySession::provisional(42, "device-test", DeviceOrigin::Primary, "SAFETY", "BUTTON_HOLD");
    pending.state = SessionState::Pending;
    SnapshotStore::new(Arc::new(store.clone()))
        .save(SessionState::Pending, &pending)
        .await
        .unwrap();

    let f = start_with(
        config(),
        InMemoryEmergencyService::new(),
        store,
        ManualLocationSource::new(),
    )
    .await;
    assert_eq!(f.handle.snapshot().state, SessionState::Pending);

    let snapshot = f.handle.wait_for(settled(SessionState::Active)).await.unwrap();
    assert_eq!(f.service.call_count(Operation::Create), 1);
    assert_eq!(
        snapshot.session.unwrap().initiation_time,
        pending.initiation_time
    );
}

#[tokio::test(start_paused = true)]
async fn test_restore_inactive_snapshot_is_erased() {
    let store = MemoryStore::new();
    SnapshotStore::new(Arc::new(store.clone()))
        .save(SessionState::Cancelled, &seeded_record(2, SessionState::Cancelled))
        .await
        .unwrap();

    let f = start_with(
        config(),
        InMemoryEmergencyService::new(),
        store,
        ManualLocationSource::new(),
    )
    .await;
    assert_eq!(f.handle.snapshot(), SessionSnapshot::default());
    assert!(f.store.is_empty());
    assert_eq!(f.service.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_processing() {
    let f = start(config()).await;
    f.handle.shutdown().await.unwrap();
    f.handle.shutdown().await.unwrap();
    assert!(!f.handle.is_running());

    f.handle.initiate();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(f.service.total_calls(), 0);
    assert_eq!(
        f.handle.wait_for(|s| s.state == SessionState::Pending).await,
        Err(SessionError::CoordinatorStopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_countdown_interval_is_rejected() {
    let config = CoordinatorConfig {
        countdown_interval_ms: 0,
        ..config()
    };
    let result = CoordinatorBuilder::new()
        .config(config)
        .service(Arc::new(InMemoryEmergencyService::new()))
        .build()
        .await;

    assert!(matches!(
        result,
        Err(SessionError::InvalidConfiguration { .. })
    ));
}
