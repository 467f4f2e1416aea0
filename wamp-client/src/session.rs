//! A transient conversation between this peer and a router, attached to a
//! realm and running over the WebSocket transport.
//!
//! The session owns the transport exclusively: the writing half sits behind a
//! send mutex shared with the dispatcher, the reading half is handed to the
//! dispatcher task at [`Session::begin`]. Lifecycle replies (WELCOME,
//! CHALLENGE, GOODBYE, ABORT) arrive on a general inbound queue consumed by
//! [`Session::recv`]; request/reply correlation happens in the pending maps of
//! [`SessionState`].

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wamp_types::{Dict, Message, uris};

use crate::{
    Error, PeerConfig, dispatcher,
    roles::{EventHandler, InvocationHandler},
    ws::{self, SocketWriter},
};

/// How long `end()` waits for the router to echo our GOODBYE. The router may
/// already be gone, so a timeout here is swallowed.
const GOODBYE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, not yet connected.
    New,
    /// TCP/TLS connect and HTTP upgrade in progress.
    Connecting,
    /// HELLO sent, waiting for the router's verdict.
    Handshaking,
    /// The router demanded authentication.
    Challenged,
    /// WELCOME received; the session id is known and requests may flow.
    Established,
    /// GOODBYE exchange in progress.
    Closing,
    /// Ended by us. Terminal.
    Closed,
    /// The transport died underneath us. Terminal.
    Failed,
}

/// Request id → the waiter that suspended on the reply.
pub(crate) type Waiters = Mutex<HashMap<u64, oneshot::Sender<Message>>>;

/// Shared correlation state, cloned into the dispatcher task.
///
/// The dispatcher's handle is a capability to deliver messages and release
/// waiters, never to drive the lifecycle; that stays with [`Session`].
pub(crate) struct SessionState {
    phase: Mutex<Phase>,
    session_id: Mutex<Option<u64>>,
    next_request_id: AtomicU64,
    /// The transport send path. Serialized by this mutex so role operations
    /// and the dispatcher can send concurrently.
    pub(crate) writer: tokio::sync::Mutex<Option<SocketWriter>>,
    pub(crate) pending_calls: Waiters,
    pub(crate) pending_registrations: Waiters,
    pub(crate) pending_unregistrations: Waiters,
    pub(crate) pending_subscriptions: Waiters,
    pub(crate) pending_unsubscriptions: Waiters,
    pub(crate) pending_publications: Waiters,
    /// procedure → registration id, populated only after REGISTERED.
    pub(crate) registration_map: Mutex<HashMap<String, u64>>,
    /// topic → subscription id, populated only after SUBSCRIBED.
    pub(crate) subscription_map: Mutex<HashMap<String, u64>>,
    pub(crate) invocation_handlers: Mutex<HashMap<u64, InvocationHandler>>,
    pub(crate) event_handlers: Mutex<HashMap<u64, EventHandler>>,
    lifecycle_tx: mpsc::Sender<Message>,
}

impl SessionState {
    fn new(lifecycle_tx: mpsc::Sender<Message>) -> Self {
        Self {
            phase: Mutex::new(Phase::New),
            session_id: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            writer: tokio::sync::Mutex::new(None),
            pending_calls: Waiters::default(),
            pending_registrations: Waiters::default(),
            pending_unregistrations: Waiters::default(),
            pending_subscriptions: Waiters::default(),
            pending_unsubscriptions: Waiters::default(),
            pending_publications: Waiters::default(),
            registration_map: Mutex::default(),
            subscription_map: Mutex::default(),
            invocation_handlers: Mutex::default(),
            event_handlers: Mutex::default(),
            lifecycle_tx,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    pub(crate) fn session_id(&self) -> Option<u64> {
        *self.session_id.lock()
    }

    /// Allocates the next outbound request id. Ids are unique and monotone
    /// within this session; they may collide across sessions.
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serializes `message` and sends it as a single text frame.
    pub(crate) async fn send(&self, message: &Message) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(Error::SessionClosed);
        };
        tracing::debug!("sending {} message", message.name());
        writer.send_text(&message.to_wire()).await
    }

    /// Pushes a lifecycle message onto the general inbound queue.
    pub(crate) async fn push_lifecycle(&self, message: Message) {
        if self.lifecycle_tx.send(message).await.is_err() {
            tracing::debug!("lifecycle queue receiver is gone");
        }
    }

    /// Releases the waiter registered for `request_id` with `message`.
    pub(crate) fn complete(&self, table: &Waiters, request_id: u64, message: Message) {
        match table.lock().remove(&request_id) {
            // the waiter may have timed out in the meantime
            Some(waiter) => {
                let _ = waiter.send(message);
            }
            None => tracing::warn!(
                "dropping {} with unknown request id {request_id}",
                message.name()
            ),
        }
    }

    /// Drops every pending waiter. Each suspended requester observes
    /// [`Error::SessionClosed`] when its channel closes.
    fn release_waiters(&self) {
        for table in [
            &self.pending_calls,
            &self.pending_registrations,
            &self.pending_unregistrations,
            &self.pending_subscriptions,
            &self.pending_unsubscriptions,
            &self.pending_publications,
        ] {
            table.lock().clear();
        }
    }

    /// The transport died underneath us: fail the session and everything
    /// waiting on it.
    pub(crate) fn connection_lost(&self) {
        self.set_phase(Phase::Failed);
        *self.session_id.lock() = None;
        self.release_waiters();
    }

    fn reset(&self) {
        self.release_waiters();
        self.registration_map.lock().clear();
        self.subscription_map.lock().clear();
        self.invocation_handlers.lock().clear();
        self.event_handlers.lock().clear();
        *self.session_id.lock() = None;
    }
}

/// A WAMP session.
///
/// A session is single-shot: [`Session::begin`] once, then [`Session::end`].
/// Reconnecting means constructing a new session.
pub struct Session {
    pub(crate) config: PeerConfig,
    pub(crate) state: Arc<SessionState>,
    lifecycle_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Session {
    /// Creates an unconnected session.
    pub fn new(config: PeerConfig) -> Self {
        let (lifecycle_tx, lifecycle_rx) = mpsc::channel(16);
        Self {
            config,
            state: Arc::new(SessionState::new(lifecycle_tx)),
            lifecycle_rx: tokio::sync::Mutex::new(lifecycle_rx),
            dispatcher: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// The router-assigned session id. Set exactly while the session is
    /// established.
    pub fn id(&self) -> Option<u64> {
        self.state.session_id()
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// The config this session was built from.
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// The registration id recorded for `procedure`. Populated only after the
    /// router's REGISTERED acknowledgement and cleared on session end.
    pub fn registration(&self, procedure: &str) -> Option<u64> {
        self.state.registration_map.lock().get(procedure).copied()
    }

    /// The subscription id recorded for `topic`. Populated only after the
    /// router's SUBSCRIBED acknowledgement and cleared on session end.
    pub fn subscription(&self, topic: &str) -> Option<u64> {
        self.state.subscription_map.lock().get(topic).copied()
    }

    /// Connects the transport, starts the dispatcher, and joins the realm.
    ///
    /// On return the session is established: [`Session::id`] is set and the
    /// dispatcher is reading the socket in the background.
    pub async fn begin(&mut self) -> Result<(), Error> {
        if self.state.phase() != Phase::New {
            return Err(Error::Protocol(
                "a session can only begin once".to_owned(),
            ));
        }

        self.state.set_phase(Phase::Connecting);
        let (reader, writer) = match ws::connect(&self.config).await {
            Ok(halves) => halves,
            Err(err) => {
                self.state.set_phase(Phase::Failed);
                return Err(err);
            }
        };
        *self.state.writer.lock().await = Some(writer);

        let handle = tokio::spawn(dispatcher::run(
            reader,
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));
        *self.dispatcher.lock() = Some(handle);

        if let Err(err) = self.say_hello().await {
            self.shutdown().await;
            self.state.set_phase(Phase::Failed);
            return Err(err);
        }
        Ok(())
    }

    /// Leaves the realm and tears the transport down.
    ///
    /// Live registrations and subscriptions are unregistered and
    /// unsubscribed before the GOODBYE exchange; the router would clear them
    /// implicitly, but an explicit end gets an explicit teardown.
    ///
    /// Idempotent; every pending operation observes [`Error::SessionClosed`].
    pub async fn end(&mut self) {
        if self.state.phase() == Phase::Established {
            self.retire_role_state().await;
            self.say_goodbye().await;
        }
        self.shutdown().await;
        self.state.set_phase(Phase::Closed);
    }

    /// Serializes `message` and sends it as a single text frame. Callable
    /// concurrently; the transport send path is serialized by a mutex.
    pub async fn send(&self, message: &Message) -> Result<(), Error> {
        self.state.send(message).await
    }

    /// Pops the next message from the general inbound queue.
    ///
    /// Only lifecycle messages land there; replies to requests are routed to
    /// their waiters by the dispatcher instead.
    pub async fn recv(&self, timeout: Duration) -> Result<Message, Error> {
        let mut lifecycle_rx = self.lifecycle_rx.lock().await;
        match tokio::time::timeout(timeout, lifecycle_rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(Error::SessionClosed),
            Err(_) => Err(Error::Protocol("no message returned".to_owned())),
        }
    }

    async fn say_hello(&self) -> Result<(), Error> {
        self.state.set_phase(Phase::Handshaking);
        let hello = Message::Hello {
            realm: self.config.realm.clone(),
            details: self.config.roles.hello_details(),
        };
        self.send(&hello).await?;
        let mut reply = self.recv(self.config.reply_timeout).await?;

        if let Message::Challenge { authmethod, extra } = &reply {
            self.state.set_phase(Phase::Challenged);
            tracing::debug!("router challenged us with method {authmethod}");
            let Some(on_challenge) = &self.config.on_challenge else {
                return Err(Error::Auth(
                    "router sent a challenge but no challenge handler is configured".to_owned(),
                ));
            };
            let signature = on_challenge(authmethod, extra);
            self.send(&Message::Authenticate {
                signature,
                extra: Dict::new(),
            })
            .await?;
            reply = self.recv(self.config.reply_timeout).await?;
        }

        match reply {
            Message::Welcome { session_id, .. } => {
                *self.state.session_id.lock() = Some(session_id);
                self.state.set_phase(Phase::Established);
                tracing::debug!(
                    "session {session_id} established on realm {}",
                    self.config.realm
                );
                Ok(())
            }
            Message::Abort { reason, .. } => Err(Error::Auth(format!(
                "router aborted session establishment: {reason}"
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to HELLO: {}",
                other.name()
            ))),
        }
    }

    /// Sends UNREGISTER/UNSUBSCRIBE for everything still recorded, on a
    /// best-effort basis; the router may already be gone.
    async fn retire_role_state(&self) {
        let procedures: Vec<String> = self.state.registration_map.lock().keys().cloned().collect();
        for procedure in procedures {
            if let Err(err) = self.unregister(&procedure).await {
                tracing::debug!("UNREGISTER {procedure} during end failed: {err}");
            }
        }
        let topics: Vec<String> = self.state.subscription_map.lock().keys().cloned().collect();
        for topic in topics {
            if let Err(err) = self.unsubscribe(&topic).await {
                tracing::debug!("UNSUBSCRIBE {topic} during end failed: {err}");
            }
        }
    }

    async fn say_goodbye(&self) {
        self.state.set_phase(Phase::Closing);
        let goodbye = Message::Goodbye {
            details: Dict::new(),
            reason: uris::CLOSE_NORMAL.to_owned(),
        };
        if let Err(err) = self.send(&goodbye).await {
            tracing::warn!("GOODBYE failed: {err}");
            return;
        }
        match self.recv(GOODBYE_TIMEOUT).await {
            Ok(Message::Goodbye { .. }) => tracing::debug!("router echoed GOODBYE"),
            Ok(other) => tracing::debug!("unexpected reply to GOODBYE: {}", other.name()),
            // router already gone
            Err(_) => {}
        }
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
        if let Some(mut writer) = self.state.writer.lock().await.take() {
            // best effort; the socket may already be gone
            let _ = writer.send_close().await;
        }
        self.state.reset();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stops the dispatcher and releases the socket on every exit path;
        // the graceful GOODBYE needs an explicit `end()`.
        self.cancel.cancel();
    }
}
