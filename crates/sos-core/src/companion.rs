//! Companion device replication
//!
//! Outbound: the coordinator hands `{state, sessionId}` messages to an
//! ordered replicator task which delivers them over a [`CompanionChannel`]
//! using the configured [`DeliveryPreference`].
//!
//! Inbound: the channel implementation invokes a [`SessionUpdateSink`]
//! (implemented by the coordinator handle) for every message it receives.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::DeliveryPreference;
use crate::error::{SessionError, SessionResult};
use crate::types::CompanionMessage;

/// Device-to-device messaging primitive
#[async_trait]
pub trait CompanionChannel: Send + Sync {
    /// Whether the peer can currently receive immediate messages
    fn is_reachable(&self) -> bool;

    /// Deliver now or fail
    async fn send_immediate(&self, message: &CompanionMessage) -> SessionResult<()>;

    /// Deliver eventually while the devices remain paired
    async fn send_queued(&self, message: &CompanionMessage) -> SessionResult<()>;
}

/// Receiver of session updates announced by the paired device
pub trait SessionUpdateSink: Send + Sync {
    fn on_companion_update(&self, message: CompanionMessage);
}

/// Deliver one message according to `preference`
pub async fn deliver(
    channel: &dyn CompanionChannel,
    preference: DeliveryPreference,
    message: &CompanionMessage,
) -> SessionResult<()> {
    if preference == DeliveryPreference::ReachabilityChecked && !channel.is_reachable() {
        debug!(state = %message.emergency_state, "Peer unreachable, queueing update");
        return channel.send_queued(message).await;
    }

    match channel.send_immediate(message).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "Immediate delivery failed, falling back to queue");
            channel.send_queued(message).await
        }
    }
}

/// Spawn the task that delivers outbound messages in submission order
pub(crate) fn spawn_replicator(
    channel: Arc<dyn CompanionChannel>,
    preference: DeliveryPreference,
    mut rx: mpsc::UnboundedReceiver<CompanionMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            trace!(state = %message.emergency_state, context_id = ?message.context_id, "Replicating");
            if let Err(e) = deliver(channel.as_ref(), preference, &message).await {
                warn!(error = %e, state = %message.emergency_state, "Failed to replicate session update");
            }
        }
        debug!("Replicator stopped");
    })
}

#[derive(Default)]
struct Endpoint {
    reachable: bool,
    sink: Option<Arc<dyn SessionUpdateSink>>,
    /// Queued payloads addressed to this endpoint
    inbox: VecDeque<String>,
    delivered: usize,
    /// Immediate sends from this endpoint that will fail
    immediate_failures: u32,
}

struct LinkShared {
    ends: [Mutex<Endpoint>; 2],
}

/// One end of an in-process paired channel.
///
/// Messages travel as JSON payloads. Queued payloads wait in the receiving
/// endpoint's inbox until it is reachable with a sink attached, then flush in
/// order.
#[derive(Clone)]
pub struct CompanionLink {
    shared: Arc<LinkShared>,
    side: usize,
}

impl CompanionLink {
    /// Create two connected endpoints, both reachable
    pub fn pair() -> (CompanionLink, CompanionLink) {
        let shared = Arc::new(LinkShared {
            ends: [
                Mutex::new(Endpoint {
                    reachable: true,
                    ..Endpoint::default()
                }),
                Mutex::new(Endpoint {
                    reachable: true,
                    ..Endpoint::default()
                }),
            ],
        });
        (
            CompanionLink {
                shared: shared.clone(),
                side: 0,
            },
            CompanionLink { shared, side: 1 },
        )
    }

    fn local(&self) -> &Mutex<Endpoint> {
        &self.shared.ends[self.side]
    }

    fn peer(&self) -> &Mutex<Endpoint> {
        &self.shared.ends[1 - self.side]
    }

    /// Register the receiver for messages sent by the peer
    pub fn attach(&self, sink: Arc<dyn SessionUpdateSink>) {
        self.local().lock().sink = Some(sink);
        Self::flush(self.local());
    }

    /// Mark this endpoint online or offline; going online flushes its inbox
    pub fn set_reachable(&self, reachable: bool) {
        self.local().lock().reachable = reachable;
        if reachable {
            Self::flush(self.local());
        }
    }

    /// Make the next `count` immediate sends from this endpoint fail
    pub fn fail_immediate(&self, count: u32) {
        self.local().lock().immediate_failures = count;
    }

    /// Payloads waiting for this endpoint
    pub fn pending(&self) -> usize {
        self.local().lock().inbox.len()
    }

    /// Messages this endpoint has received
    pub fn delivered(&self) -> usize {
        self.local().lock().delivered
    }

    fn flush(endpoint: &Mutex<Endpoint>) {
        loop {
            let (sink, payload) = {
                let mut end = endpoint.lock();
                if !end.reachable {
                    return;
                }
                let Some(sink) = end.sink.clone() else {
                    return;
                };
                let Some(payload) = end.inbox.pop_front() else {
                    return;
                };
                end.delivered += 1;
                (sink, payload)
            };
            Self::dispatch(&sink, &payload);
        }
    }

    fn dispatch(sink: &Arc<dyn SessionUpdateSink>, payload: &str) {
        match CompanionMessage::from_payload(payload) {
            Ok(message) => sink.on_companion_update(message),
            Err(e) => warn!(error = %e, "Dropping undecodable companion payload"),
        }
    }
}

#[async_trait]
impl CompanionChannel for CompanionLink {
    fn is_reachable(&self) -> bool {
        let peer = self.peer().lock();
        peer.reachable && peer.sink.is_some()
    }

    async fn send_immediate(&self, message: &CompanionMessage) -> SessionResult<()> {
        {
            let mut local = self.local().lock();
            if local.immediate_failures > 0 {
                local.immediate_failures -= 1;
                return Err(SessionError::companion("immediate delivery failed"));
            }
        }

        let payload = message.to_payload()?;
        let sink = {
            let mut peer = self.peer().lock();
            if !peer.reachable {
                return Err(SessionError::CompanionUnreachable);
            }
            let sink = peer.sink.clone().ok_or(SessionError::CompanionUnreachable)?;
            peer.delivered += 1;
            sink
        };
        Self::dispatch(&sink, &payload);
        Ok(())
    }

    async fn send_queued(&self, message: &CompanionMessage) -> SessionResult<()> {
        let payload = message.to_payload()?;
        self.peer().lock().inbox.push_back(payload);
        Self::flush(self.peer());
        Ok(())
    }
}
