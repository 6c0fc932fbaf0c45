//! The session coordinator actor
//!
//! All session state lives in [`SessionCoordinator`], which runs as a single
//! task draining one message queue. Commands from handles, remote call
//! completions, timer firings, location fixes and companion announcements
//! are all messages, so every mutation is applied in queue order and no
//! state is shared across tasks.
//!
//! Remote calls run in their own tasks and post a completion tagged with the
//! epoch they were issued in. Every reset starts a new epoch, which is how
//! late completions for a discarded session are recognized.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::companion::{CompanionChannel, spawn_replicator};
use crate::config::CoordinatorConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{ChangeSource, Operation, SessionEvent};
use crate::location::{LocationSource, TrackingAccuracy};
use crate::recovery::{RetryConfig, call_with_retry, with_timeout};
use crate::service::{CreateEmergencyRequest, EmergencyService};
use crate::state_table::{Action, Guard, GuardContext, SESSION_TABLE, Trigger};
use crate::store::SnapshotStore;
use crate::timer::{TimerSlot, spawn_once, spawn_repeating};
use crate::types::{
    CompanionMessage, EmergencyId, EmergencySession, Location, SessionSnapshot, SessionState,
};

/// Emergency type and activation method for a new session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CreateParams {
    pub emergency_type: Option<String>,
    pub activation_method: Option<String>,
}

#[derive(Debug)]
pub(crate) enum Command {
    Initiate(CreateParams),
    ActivateImmediately(CreateParams),
    Cancel,
    BeginRecovery,
    CompleteRecovery,
    Retry,
}

#[derive(Debug)]
pub(crate) enum Completion {
    Created(SessionResult<EmergencySession>),
    Activated(SessionResult<EmergencySession>),
    Cancelled(SessionResult<EmergencySession>),
    RecoveryBegun(SessionResult<EmergencySession>),
    RecoveryCompleted(SessionResult<EmergencySession>),
    Verified(SessionResult<EmergencySession>),
    LocationPushed(SessionResult<EmergencySession>),
    CompanionFetched {
        context_id: EmergencyId,
        announced: SessionState,
        result: SessionResult<EmergencySession>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    CountdownTick,
    RecoveryTimeout,
    Reconnect,
}

#[derive(Debug)]
pub(crate) enum Message {
    Command(Command),
    Completion { epoch: u64, completion: Completion },
    Timer { id: u64, kind: TimerKind },
    Location(Location),
    Companion(CompanionMessage),
    Shutdown(oneshot::Sender<()>),
}

/// Collaborators the coordinator drives
pub(crate) struct Collaborators {
    pub service: Arc<dyn EmergencyService>,
    pub store: SnapshotStore,
    pub location: Arc<dyn LocationSource>,
    pub companion: Option<Arc<dyn CompanionChannel>>,
}

pub(crate) struct SessionCoordinator {
    config: CoordinatorConfig,
    service: Arc<dyn EmergencyService>,
    store: SnapshotStore,
    location: Arc<dyn LocationSource>,

    state: SessionState,
    session: Option<EmergencySession>,
    countdown_remaining: u32,
    last_error: Option<SessionError>,

    /// Counted remote calls of the current epoch
    in_flight: u32,
    create_in_flight: bool,
    activate_in_flight: bool,
    verify_in_flight: bool,
    /// Activation is owed once the record has an id
    activation_pending: bool,
    /// Complete-recovery issued, reset pending
    closing: bool,
    /// Session being fetched for the companion and the latest state it announced
    companion_fetch: Option<(EmergencyId, SessionState)>,
    epoch: u64,

    next_timer_id: u64,
    countdown: TimerSlot,
    recovery: TimerSlot,
    reconnect: TimerSlot,

    tx: mpsc::UnboundedSender<Message>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
    replicate_tx: Option<mpsc::UnboundedSender<CompanionMessage>>,
    background: Vec<JoinHandle<()>>,
}

impl SessionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        collaborators: Collaborators,
        tx: mpsc::UnboundedSender<Message>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let mut background = Vec::new();

        let replicate_tx = collaborators.companion.map(|channel| {
            let (rtx, rrx) = mpsc::unbounded_channel();
            background.push(spawn_replicator(channel, config.delivery(), rrx));
            rtx
        });

        background.push(spawn_location_forwarder(
            collaborators.location.as_ref(),
            tx.clone(),
        ));

        Self {
            config,
            service: collaborators.service,
            store: collaborators.store,
            location: collaborators.location,
            state: SessionState::Inactive,
            session: None,
            countdown_remaining: 0,
            last_error: None,
            in_flight: 0,
            create_in_flight: false,
            activate_in_flight: false,
            verify_in_flight: false,
            activation_pending: false,
            closing: false,
            companion_fetch: None,
            epoch: 0,
            next_timer_id: 0,
            countdown: TimerSlot::new(),
            recovery: TimerSlot::new(),
            reconnect: TimerSlot::new(),
            tx,
            snapshot_tx,
            events_tx,
            replicate_tx,
            background,
        }
    }

    /// Adopt a persisted snapshot before the message loop starts
    pub async fn restore(&mut self) {
        let loaded = match self.store.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Failed to load session snapshot");
                None
            }
        };

        let Some((state, session)) = loaded else {
            self.publish();
            return;
        };

        info!(state = %state, session_id = ?session.id, "Restoring persisted session");

        match state {
            SessionState::Inactive | SessionState::Cancelled => {
                self.clear_store().await;
            }
            SessionState::Pending => {
                self.session = Some(session);
                self.set_state(SessionState::Pending, ChangeSource::Local);
                for action in [
                    Action::StartCountdown,
                    Action::RequestLocationAuthorization,
                    Action::StartTracking(TrackingAccuracy::Standard),
                ] {
                    self.execute(action, &CreateParams::default()).await;
                }
                if self.session_id().is_none() {
                    self.issue_create(&CreateParams::default());
                }
            }
            SessionState::Active | SessionState::Recovering => {
                self.session = Some(session);
                self.set_state(state, ChangeSource::Local);
                match self.session_id() {
                    Some(id) => self.issue_verify(id),
                    None => {
                        self.activation_pending = true;
                        self.location.request_authorization().await;
                        self.location.start_tracking(TrackingAccuracy::HighAccuracy).await;
                        self.issue_create(&CreateParams::default());
                    }
                }
            }
        }

        self.publish();
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        debug!("Session coordinator started");
        while let Some(message) = rx.recv().await {
            match message {
                Message::Shutdown(reply) => {
                    self.stop_all_timers();
                    self.replicate_tx = None;
                    for task in self.background.drain(..) {
                        task.abort();
                    }
                    let _ = reply.send(());
                    break;
                }
                Message::Command(command) => self.handle_command(command).await,
                Message::Completion { epoch, completion } => {
                    self.handle_completion(epoch, completion).await
                }
                Message::Timer { id, kind } => self.handle_timer(id, kind).await,
                Message::Location(location) => self.handle_location(location),
                Message::Companion(message) => self.handle_companion(message).await,
            }
            self.publish();
        }
        debug!("Session coordinator stopped");
    }

    // ---- triggers ----

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initiate(params) => self.fire(Trigger::Initiate, params).await,
            Command::ActivateImmediately(params) => {
                self.fire(Trigger::ActivateImmediately, params).await
            }
            Command::Cancel => self.fire(Trigger::Cancel, CreateParams::default()).await,
            Command::BeginRecovery => {
                self.fire(Trigger::BeginRecovery, CreateParams::default()).await
            }
            Command::CompleteRecovery => {
                self.fire(Trigger::CompleteRecovery, CreateParams::default()).await
            }
            Command::Retry => self.retry(),
        }
    }

    async fn fire(&mut self, trigger: Trigger, params: CreateParams) {
        let Some(transition) = SESSION_TABLE.get(self.state, trigger) else {
            debug!(state = %self.state, ?trigger, "Trigger ignored in current state");
            return;
        };

        if let Some(guard) = transition.failed_guard(&self.guard_context()) {
            debug!(state = %self.state, ?trigger, ?guard, "Guard not satisfied, trigger ignored");
            if guard == Guard::HasIdentity {
                let error = self.identity_error();
                self.record_failure(Operation::Create, error);
            }
            return;
        }

        let epoch = self.epoch;
        let changed = match transition.next_state {
            Some(next) => self.set_state(next, ChangeSource::Local),
            None => false,
        };

        for action in &transition.actions {
            self.execute(*action, &params).await;
            if self.epoch != epoch {
                // The action reset the session
                return;
            }
        }

        if changed {
            self.commit(true).await;
        }
    }

    async fn execute(&mut self, action: Action, params: &CreateParams) {
        match action {
            Action::CreateProvisionalRecord => {
                let method = self.activation_method(params);
                let mut session = EmergencySession::provisional(
                    self.config.user_id.unwrap_or_default(),
                    self.config.device_id.clone().unwrap_or_default(),
                    self.config.device_origin,
                    self.emergency_type(params),
                    method,
                );
                session.state = self.state;
                self.session = Some(session);
            }
            Action::StartCountdown => {
                self.countdown_remaining = self.config.countdown_ticks;
                let id = self.timer_id();
                let tx = self.tx.clone();
                let handle = spawn_repeating(self.config.countdown_interval(), tx, move || {
                    Message::Timer {
                        id,
                        kind: TimerKind::CountdownTick,
                    }
                });
                self.countdown.arm(id, handle);
            }
            Action::StopCountdown => self.countdown.stop(),
            Action::RequestLocationAuthorization => self.location.request_authorization().await,
            Action::StartTracking(accuracy) => self.location.start_tracking(accuracy).await,
            Action::StopTracking => self.location.stop_tracking().await,
            Action::StampActivation => {
                if let Some(session) = self.session.as_mut() {
                    session.activation_time.get_or_insert_with(Utc::now);
                }
            }
            Action::CreateRecord => self.issue_create(params),
            Action::ActivateRecord => {
                self.activation_pending = true;
                if let Some(id) = self.session_id() {
                    self.issue_activate(id);
                } else {
                    debug!("Activation deferred until the record has an id");
                }
            }
            Action::CancelRecord => match self.session_id() {
                Some(id) => {
                    info!(session_id = id, "Cancelling emergency");
                    self.spawn_request(
                        Operation::Cancel,
                        RetryConfig::none(),
                        move |s| async move { s.cancel(id).await },
                        Completion::Cancelled,
                    );
                }
                None => {
                    info!("Cancelled before the record was created");
                    self.reset(ChangeSource::Local).await;
                }
            },
            Action::BeginRecoveryRemote => {
                if let Some(id) = self.session_id() {
                    info!(session_id = id, "Beginning recovery");
                    self.spawn_request(
                        Operation::BeginRecovery,
                        RetryConfig::none(),
                        move |s| async move { s.begin_recovery(id).await },
                        Completion::RecoveryBegun,
                    );
                }
            }
            Action::StopRecoveryTimer => self.recovery.stop(),
            Action::CompleteRecoveryRemote => {
                if let Some(id) = self.session_id() {
                    info!(session_id = id, "Completing recovery");
                    self.closing = true;
                    self.spawn_request(
                        Operation::CompleteRecovery,
                        RetryConfig::none(),
                        move |s| async move { s.complete_recovery(id).await },
                        Completion::RecoveryCompleted,
                    );
                }
            }
        }
    }

    fn retry(&mut self) {
        let active = matches!(self.state, SessionState::Pending | SessionState::Active);
        match self.session_id() {
            None if active && self.session.is_some() && !self.create_in_flight => {
                info!("Retrying emergency creation");
                self.last_error = None;
                self.issue_create(&CreateParams::default());
            }
            Some(id)
                if self.state == SessionState::Active
                    && self.activation_pending
                    && !self.activate_in_flight =>
            {
                info!(session_id = id, "Retrying emergency activation");
                self.last_error = None;
                self.issue_activate(id);
            }
            _ => debug!(state = %self.state, "Nothing to retry"),
        }
    }

    // ---- remote calls ----

    fn issue_create(&mut self, params: &CreateParams) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let request = CreateEmergencyRequest {
            user_id: session.user_id,
            device_id: session.device_id.clone(),
            device_origin: session.device_origin,
            emergency_type: session
                .emergency_type
                .clone()
                .unwrap_or_else(|| self.emergency_type(params)),
            activation_method: session
                .activation_method
                .clone()
                .unwrap_or_else(|| self.activation_method(params)),
        };
        debug!(user_id = request.user_id, device_id = %request.device_id, "Creating emergency record");

        self.create_in_flight = true;
        let retry = self.config.retry_config();
        self.spawn_request(
            Operation::Create,
            retry,
            move |s| {
                let request = request.clone();
                async move { s.create(&request).await }
            },
            Completion::Created,
        );
    }

    fn issue_activate(&mut self, id: EmergencyId) {
        if self.activate_in_flight {
            return;
        }
        let coordinates = self.location.last_location().map(|l| l.coordinates());
        match coordinates {
            Some(c) => info!(session_id = id, latitude = c.latitude, longitude = c.longitude, "Activating emergency"),
            None => info!(session_id = id, "Activating emergency without location"),
        }

        self.activate_in_flight = true;
        let retry = self.config.retry_config();
        self.spawn_request(
            Operation::Activate,
            retry,
            move |s| async move { s.activate(id, coordinates).await },
            Completion::Activated,
        );
    }

    fn issue_verify(&mut self, id: EmergencyId) {
        if self.verify_in_flight {
            return;
        }
        debug!(session_id = id, "Verifying restored session with server");
        self.verify_in_flight = true;
        self.spawn_request(
            Operation::Fetch,
            RetryConfig::none(),
            move |s| async move { s.fetch(id).await },
            Completion::Verified,
        );
    }

    /// Run a counted remote call bounded by the request timeout
    fn spawn_request<F, Fut, W>(
        &mut self,
        operation: Operation,
        retry: RetryConfig,
        call: F,
        wrap: W,
    ) where
        F: Fn(Arc<dyn EmergencyService>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<EmergencySession>> + Send + 'static,
        W: FnOnce(SessionResult<EmergencySession>) -> Completion + Send + 'static,
    {
        self.in_flight += 1;
        let service = self.service.clone();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let timeout = self.config.request_timeout();

        tokio::spawn(async move {
            let result =
                call_with_retry(operation, &retry, timeout, || call(service.clone())).await;
            let _ = tx.send(Message::Completion {
                epoch,
                completion: wrap(result),
            });
        });
    }

    /// Best-effort cancel of a record nobody holds any more
    fn cancel_orphan(&self, id: EmergencyId) {
        info!(session_id = id, "Cancelling orphaned emergency record");
        let service = self.service.clone();
        let timeout = self.config.request_timeout();
        tokio::spawn(async move {
            if let Err(e) = with_timeout(Operation::Cancel, timeout, service.cancel(id)).await {
                warn!(session_id = id, error = %e, "Failed to cancel orphaned record");
            }
        });
    }

    // ---- completions ----

    async fn handle_completion(&mut self, epoch: u64, completion: Completion) {
        if epoch != self.epoch {
            if let Completion::Created(Ok(record)) = &completion {
                if let Some(id) = record.id {
                    self.cancel_orphan(id);
                }
            }
            debug!(epoch, current = self.epoch, "Dropping completion for a discarded session");
            return;
        }
        if !matches!(completion, Completion::LocationPushed(_)) {
            self.in_flight = self.in_flight.saturating_sub(1);
        }

        match completion {
            Completion::Created(result) => {
                self.create_in_flight = false;
                match result {
                    Ok(record) => {
                        if let (Some(known), Some(id)) = (self.session_id(), record.id) {
                            if known != id {
                                self.cancel_orphan(id);
                                return;
                            }
                        }
                        if self.adopt_or_fail(record, Operation::Create).await {
                            info!(session_id = ?self.session_id(), state = %self.state, "Emergency record created");
                            if self.activation_pending && self.state == SessionState::Active {
                                if let Some(id) = self.session_id() {
                                    self.issue_activate(id);
                                }
                            }
                        }
                    }
                    Err(e) => self.record_failure(Operation::Create, e),
                }
            }
            Completion::Activated(result) => {
                self.activate_in_flight = false;
                match result {
                    Ok(record) => {
                        if self.adopt_or_fail(record, Operation::Activate).await {
                            self.activation_pending = false;
                            info!(session_id = ?self.session_id(), "Emergency activated");
                        }
                    }
                    Err(e) => self.record_failure(Operation::Activate, e),
                }
            }
            Completion::Cancelled(result) => {
                let id = self.session_id();
                self.reset(ChangeSource::Local).await;
                if let Err(e) = result {
                    self.record_failure(Operation::Cancel, e);
                }
                self.replicate_message(CompanionMessage::new(SessionState::Inactive, id));
            }
            Completion::RecoveryBegun(result) => {
                if self.closing || self.state != SessionState::Recovering {
                    return;
                }
                match result {
                    Ok(record) => {
                        self.adopt_or_fail(record, Operation::BeginRecovery).await;
                    }
                    Err(e) => self.record_failure(Operation::BeginRecovery, e),
                }
                self.start_recovery_timer();
            }
            Completion::RecoveryCompleted(result) => {
                let id = self.session_id();
                self.reset(ChangeSource::Local).await;
                if let Err(e) = result {
                    self.record_failure(Operation::CompleteRecovery, e);
                }
                self.replicate_message(CompanionMessage::new(SessionState::Inactive, id));
            }
            Completion::Verified(result) => {
                self.verify_in_flight = false;
                self.handle_verified(result).await;
            }
            Completion::LocationPushed(result) => match result {
                Ok(record) if self.session_id().is_some() => {
                    if let Err(e) = self.adopt(record, true).await {
                        debug!(error = %e, "Ignoring location update response");
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Location update failed"),
            },
            Completion::CompanionFetched {
                context_id,
                announced,
                result,
            } => {
                let announced = match self.companion_fetch.take() {
                    Some((id, latest)) if id == context_id => latest,
                    other => {
                        self.companion_fetch = other;
                        announced
                    }
                };
                match result {
                    Ok(record) => self.adopt_from_companion(announced, record).await,
                    Err(e) => self.record_failure(Operation::Fetch, e),
                }
            }
        }
    }

    async fn handle_verified(&mut self, result: SessionResult<EmergencySession>) {
        match result {
            Ok(record) => {
                let server_state = record.state;
                info!(session_id = ?record.id, state = %server_state, "Server verified restored session");
                match server_state {
                    SessionState::Active | SessionState::Recovering => {
                        if !self.adopt_or_fail(record, Operation::Fetch).await {
                            return;
                        }
                        self.reconnect.stop();
                        self.last_error = None;
                        if self.set_state(server_state, ChangeSource::Server) {
                            self.commit(true).await;
                        }
                        self.location.request_authorization().await;
                        self.location.start_tracking(TrackingAccuracy::HighAccuracy).await;
                        if server_state == SessionState::Recovering {
                            if !self.recovery.is_armed() {
                                self.start_recovery_timer();
                            }
                        } else {
                            self.recovery.stop();
                        }
                    }
                    _ => self.reset(ChangeSource::Server).await,
                }
            }
            Err(e) => {
                self.record_failure(Operation::Fetch, e);
                let delay = self.config.reconnect_delay();
                info!(delay_secs = delay.as_secs(), "Scheduling server reconnection");
                let id = self.timer_id();
                let handle = spawn_once(
                    delay,
                    self.tx.clone(),
                    Message::Timer {
                        id,
                        kind: TimerKind::Reconnect,
                    },
                );
                self.reconnect.arm(id, handle);
            }
        }
    }

    // ---- timers ----

    async fn handle_timer(&mut self, id: u64, kind: TimerKind) {
        match kind {
            TimerKind::CountdownTick => {
                if !self.countdown.is_current(id) {
                    return;
                }
                self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
                debug!(remaining = self.countdown_remaining, "Countdown tick");
                self.emit(SessionEvent::CountdownTick {
                    remaining: self.countdown_remaining,
                });
                if self.countdown_remaining == 0 {
                    self.countdown.stop();
                    self.fire(Trigger::CountdownElapsed, CreateParams::default()).await;
                }
            }
            TimerKind::RecoveryTimeout => {
                if !self.recovery.is_current(id) {
                    return;
                }
                self.recovery.disarm(id);
                info!(session_id = ?self.session_id(), "Recovery window elapsed, completing");
                self.fire(Trigger::RecoveryTimeout, CreateParams::default()).await;
            }
            TimerKind::Reconnect => {
                if !self.reconnect.is_current(id) {
                    return;
                }
                self.reconnect.disarm(id);
                if matches!(self.state, SessionState::Active | SessionState::Recovering) {
                    if let Some(session_id) = self.session_id() {
                        self.issue_verify(session_id);
                    }
                }
            }
        }
    }

    fn start_recovery_timer(&mut self) {
        let window = self.config.recovery_window();
        debug!(window_secs = window.as_secs(), "Recovery timer started");
        let id = self.timer_id();
        let handle = spawn_once(
            window,
            self.tx.clone(),
            Message::Timer {
                id,
                kind: TimerKind::RecoveryTimeout,
            },
        );
        self.recovery.arm(id, handle);
    }

    fn stop_all_timers(&mut self) {
        self.countdown.stop();
        self.recovery.stop();
        self.reconnect.stop();
    }

    fn timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    // ---- inbound location and companion updates ----

    fn handle_location(&mut self, location: Location) {
        if !matches!(self.state, SessionState::Active | SessionState::Recovering) {
            return;
        }
        let Some(id) = self.session_id() else {
            return;
        };
        let service = self.service.clone();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let timeout = self.config.request_timeout();
        let coordinates = location.coordinates();
        tokio::spawn(async move {
            let result = with_timeout(
                Operation::UpdateLocation,
                timeout,
                service.update_location(id, coordinates),
            )
            .await;
            let _ = tx.send(Message::Completion {
                epoch,
                completion: Completion::LocationPushed(result),
            });
        });
    }

    async fn handle_companion(&mut self, message: CompanionMessage) {
        let Some(context_id) = message.context_id else {
            debug!(state = %message.emergency_state, "Ignoring companion update without session id");
            return;
        };
        let announced = message.emergency_state;
        let known = self.session_id();
        debug!(state = %announced, context_id, ?known, "Companion update received");

        match announced {
            SessionState::Inactive | SessionState::Cancelled => {
                let ours = known == Some(context_id) || self.session.is_none();
                let idle = self.state == SessionState::Inactive && self.session.is_none();
                if ours && !idle {
                    info!(session_id = context_id, "Companion ended the session");
                    self.reset(ChangeSource::Companion).await;
                }
            }
            _ if known == Some(context_id) => {
                if self.state.would_rewind(announced) {
                    debug!(context_id, current = %self.state, state = %announced, "Ignoring stale companion update");
                } else if self.state != announced {
                    self.apply_companion_state(announced);
                    self.persist().await;
                }
            }
            _ => {
                if let Some((id, latest)) = self.companion_fetch.as_mut() {
                    if *id == context_id {
                        if !latest.would_rewind(announced) {
                            debug!(context_id, state = %announced, "Companion fetch in flight, updating target state");
                            *latest = announced;
                        }
                        return;
                    }
                }
                debug!(context_id, "Fetching session announced by companion");
                self.companion_fetch = Some((context_id, announced));
                self.spawn_request(
                    Operation::Fetch,
                    RetryConfig::none(),
                    move |s| async move { s.fetch(context_id).await },
                    move |result| Completion::CompanionFetched {
                        context_id,
                        announced,
                        result,
                    },
                );
            }
        }
    }

    async fn adopt_from_companion(&mut self, announced: SessionState, record: EmergencySession) {
        let Some(id) = record.id else {
            self.record_failure(
                Operation::Fetch,
                SessionError::invalid_response("record without id"),
            );
            return;
        };

        let mut announced = announced;
        if let Some(previous) = self.session_id() {
            if previous != id {
                info!(previous, session_id = id, "Replacing session with companion's");
            } else if self.state.would_rewind(announced) {
                announced = self.state;
            }
        }

        self.session = Some(record);
        self.apply_companion_state(announced);
        self.persist().await;
        if let Some(session) = self.session.clone() {
            self.emit(SessionEvent::SessionUpdated { session });
        }
    }

    fn apply_companion_state(&mut self, announced: SessionState) {
        if announced != SessionState::Pending {
            self.countdown.stop();
            self.countdown_remaining = 0;
        }
        if announced == SessionState::Recovering {
            if !self.recovery.is_armed() {
                self.start_recovery_timer();
            }
        } else {
            self.recovery.stop();
        }
        if matches!(announced, SessionState::Active | SessionState::Recovering) {
            if let Some(session) = self.session.as_mut() {
                session.activation_time.get_or_insert_with(Utc::now);
            }
        }
        self.set_state(announced, ChangeSource::Companion);
    }

    // ---- state plumbing ----

    fn set_state(&mut self, next: SessionState, source: ChangeSource) -> bool {
        if let Some(session) = self.session.as_mut() {
            session.state = next;
        }
        if self.state == next {
            return false;
        }
        let previous = self.state;
        self.state = next;
        info!(from = %previous, to = %next, ?source, session_id = ?self.session_id(), "Session state changed");
        self.emit(SessionEvent::state_changed(previous, next, source));
        true
    }

    /// Merge a server copy of the current record into local state.
    ///
    /// Fails without touching state when the copy has no id or names a
    /// different session.
    async fn adopt(&mut self, mut record: EmergencySession, replicate: bool) -> SessionResult<()> {
        let Some(id) = record.id else {
            return Err(SessionError::invalid_response("record without id"));
        };
        if let Some(current) = self.session.as_ref() {
            if let Some(known) = current.id {
                if known != id {
                    return Err(SessionError::invalid_response(format!(
                        "record {} does not match session {}",
                        id, known
                    )));
                }
            }
            record.merge_from(current);
        }

        record.state = self.state;
        if matches!(self.state, SessionState::Active | SessionState::Recovering) {
            record.activation_time.get_or_insert_with(Utc::now);
        }
        self.session = Some(record.clone());
        self.commit(replicate).await;
        self.emit(SessionEvent::SessionUpdated { session: record });
        Ok(())
    }

    async fn adopt_or_fail(&mut self, record: EmergencySession, operation: Operation) -> bool {
        match self.adopt(record, true).await {
            Ok(()) => true,
            Err(e) => {
                self.record_failure(operation, e);
                false
            }
        }
    }

    /// Persist and, unless the change came from the companion, replicate
    async fn commit(&mut self, replicate: bool) {
        self.persist().await;
        if replicate {
            self.replicate_message(CompanionMessage::new(self.state, self.session_id()));
        }
    }

    async fn persist(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(e) = self.store.save(self.state, session).await {
            warn!(error = %e, "Failed to persist session snapshot");
            self.emit(SessionEvent::RequestFailed {
                operation: Operation::Persist,
                error: e,
            });
        }
    }

    async fn clear_store(&mut self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to erase session snapshot");
            self.emit(SessionEvent::RequestFailed {
                operation: Operation::Persist,
                error: e,
            });
        }
    }

    fn replicate_message(&self, message: CompanionMessage) {
        if message.context_id.is_none() {
            return;
        }
        if let Some(tx) = &self.replicate_tx {
            if tx.send(message).is_err() {
                warn!("Replicator is gone, companion update dropped");
            }
        }
    }

    async fn reset(&mut self, source: ChangeSource) {
        let session_id = self.session_id();
        self.stop_all_timers();
        self.location.stop_tracking().await;

        self.session = None;
        self.countdown_remaining = 0;
        self.last_error = None;
        self.in_flight = 0;
        self.create_in_flight = false;
        self.activate_in_flight = false;
        self.verify_in_flight = false;
        self.activation_pending = false;
        self.closing = false;
        self.companion_fetch = None;
        self.epoch += 1;

        self.clear_store().await;
        self.set_state(SessionState::Inactive, source);
        info!(session_id = ?session_id, "Session reset");
        self.emit(SessionEvent::Reset { session_id });
    }

    fn record_failure(&mut self, operation: Operation, error: SessionError) {
        warn!(
            operation = %operation,
            error = %error,
            category = error.category(),
            session_id = ?self.session_id(),
            "Request failed"
        );
        self.last_error = Some(error.clone());
        self.emit(SessionEvent::RequestFailed { operation, error });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            session: self.session.clone(),
            countdown_remaining: self.countdown_remaining,
            is_processing_request: self.in_flight > 0,
            last_error: self.last_error.clone(),
        }
    }

    fn session_id(&self) -> Option<EmergencyId> {
        self.session.as_ref().and_then(|s| s.id)
    }

    fn guard_context(&self) -> GuardContext {
        GuardContext {
            has_identity: self.identity_missing().is_none(),
            has_record_id: self.session_id().is_some(),
            closing: self.closing,
        }
    }

    fn identity_missing(&self) -> Option<&'static str> {
        if self.config.user_id.is_none() {
            return Some("userId");
        }
        match self.config.device_id.as_deref() {
            Some(id) if !id.trim().is_empty() => None,
            _ => Some("deviceId"),
        }
    }

    fn identity_error(&self) -> SessionError {
        SessionError::missing_identity(self.identity_missing().unwrap_or("identity"))
    }

    fn emergency_type(&self, params: &CreateParams) -> String {
        params
            .emergency_type
            .clone()
            .unwrap_or_else(|| self.config.emergency_type.clone())
    }

    fn activation_method(&self, params: &CreateParams) -> String {
        params.activation_method.clone().unwrap_or_else(|| {
            if self.state == SessionState::Pending {
                self.config.initiate_method.clone()
            } else {
                self.config.immediate_method.clone()
            }
        })
    }
}

fn spawn_location_forwarder(
    location: &dyn LocationSource,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    let mut fixes = location.subscribe();
    tokio::spawn(async move {
        loop {
            match fixes.recv().await {
                Ok(fix) => {
                    if tx.send(Message::Location(fix)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Location forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
