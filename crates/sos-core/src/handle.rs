//! Public handle to a running coordinator

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::companion::SessionUpdateSink;
use crate::coordinator::{Command, CreateParams, Message};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::types::{CompanionMessage, SessionSnapshot};

/// Cloneable handle to a coordinator task.
///
/// Commands return immediately; their outcome is observed through
/// [`snapshot`](Self::snapshot), [`watch`](Self::watch) or
/// [`subscribe_events`](Self::subscribe_events). A command whose guard does
/// not hold in the current state is ignored.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Message>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Message>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            tx,
            snapshot_rx,
            events_tx,
        }
    }

    /// Start the countdown with the configured emergency type
    pub fn initiate(&self) {
        self.command(Command::Initiate(CreateParams::default()));
    }

    pub fn initiate_with(&self, emergency_type: impl Into<String>, activation_method: impl Into<String>) {
        self.command(Command::Initiate(CreateParams {
            emergency_type: Some(emergency_type.into()),
            activation_method: Some(activation_method.into()),
        }));
    }

    /// Skip the countdown
    pub fn activate_immediately(&self) {
        self.command(Command::ActivateImmediately(CreateParams::default()));
    }

    pub fn activate_immediately_with(
        &self,
        emergency_type: impl Into<String>,
        activation_method: impl Into<String>,
    ) {
        self.command(Command::ActivateImmediately(CreateParams {
            emergency_type: Some(emergency_type.into()),
            activation_method: Some(activation_method.into()),
        }));
    }

    /// Cancel during the countdown
    pub fn cancel(&self) {
        self.command(Command::Cancel);
    }

    pub fn begin_recovery(&self) {
        self.command(Command::BeginRecovery);
    }

    /// Mark the user safe and close the session
    pub fn complete_recovery(&self) {
        self.command(Command::CompleteRecovery);
    }

    /// Re-issue a failed create or activation
    pub fn retry(&self) {
        self.command(Command::Retry);
    }

    /// Latest published view
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Wait until a published snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> SessionResult<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshot_rx.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            rx.changed()
                .await
                .map_err(|_| SessionError::CoordinatorStopped)?;
        }
    }

    /// Stop the coordinator and its timers. Later commands are dropped.
    pub async fn shutdown(&self) -> SessionResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Message::Shutdown(reply_tx)).is_err() {
            return Ok(());
        }
        let _ = reply_rx.await;
        Ok(())
    }

    fn command(&self, command: Command) {
        if let Err(e) = self.tx.send(Message::Command(command)) {
            debug!(command = ?e.0, "Coordinator stopped, command dropped");
        }
    }
}

impl SessionUpdateSink for CoordinatorHandle {
    fn on_companion_update(&self, message: CompanionMessage) {
        if self.tx.send(Message::Companion(message)).is_err() {
            debug!("Coordinator stopped, companion update dropped");
        }
    }
}
