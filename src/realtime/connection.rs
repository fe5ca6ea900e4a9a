//! Connection manager and the public client handle.
//!
//! [`SyncClient`] is a cheap handle to a background driver task that owns the
//! transport, the connection state machine, the reconnect policy and the
//! joined room. Every public operation and every transport callback is a
//! message on one channel, so state is only ever mutated by the driver, one
//! message at a time.
//!
//! Anything that can complete after the state moved on (credential lookups,
//! transport opens, inbound frames, retry timers) is tagged with the epoch
//! current when it started. Bumping the epoch on `disconnect()` or on a new
//! attempt turns every older completion into a no-op.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{EventDispatcher, HandlerResult, Subscription};
use super::events::{
    ClientMessage, ConnectFailure, DisconnectInfo, Event, EventKind, SyncEvent, decode_frame,
};
use super::session::{AppState, LifecycleAction, RoomTracker, lifecycle_action};
use super::transport::{Endpoint, Frame, NORMAL_CLOSURE, Transport, TransportEvent, TransportLink};
use crate::cache::{CacheReconciler, QueryCache};
use crate::config::SyncConfig;
use crate::credentials::TokenStore;
use crate::error::{Result, SyncError};

/// Reason sent with the close frame on an explicit disconnect.
const CLIENT_DISCONNECT_REASON: &str = "Client disconnect";

/// Connection state visible to consumers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// No transport; initial state.
    #[default]
    Disconnected,
    /// Credential resolved, transport opening.
    Connecting,
    /// Transport open and acknowledged.
    Connected,
    /// Credential missing or retries exhausted; needs a manual `connect()`.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver messages
// ---------------------------------------------------------------------------

enum Command {
    Connect(Option<oneshot::Sender<Result<()>>>),
    Disconnect(oneshot::Sender<()>),
    JoinRoom(String),
    LeaveRoom(String),
    SetAppState(AppState),
}

enum DriverMsg {
    Command(Command),
    TokenResolved {
        epoch: u64,
        token: Result<Option<String>>,
    },
    Opened {
        epoch: u64,
        result: Result<TransportLink>,
    },
    Transport {
        epoch: u64,
        event: TransportEvent,
    },
    RetryDue {
        epoch: u64,
    },
}

// ---------------------------------------------------------------------------
// SyncClient
// ---------------------------------------------------------------------------

struct Inner {
    commands: mpsc::UnboundedSender<DriverMsg>,
    status: watch::Receiver<ConnectionStatus>,
    room: watch::Receiver<Option<String>>,
    dispatcher: EventDispatcher,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to the realtime sync connection.
///
/// Cloning yields another handle to the same connection. The driver stops
/// when the last handle is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("status", &self.status())
            .field("room", &self.current_room())
            .finish()
    }
}

impl SyncClient {
    /// Build a client and spawn its driver on the current tokio runtime.
    ///
    /// The cache reconciler is registered before any consumer can subscribe,
    /// so consumer handlers always observe the already-reconciled cache.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        config: SyncConfig,
        tokens: Arc<dyn TokenStore>,
        cache: Arc<dyn QueryCache>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let dispatcher = EventDispatcher::new();
        CacheReconciler::new(cache).attach(&dispatcher);

        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (room_tx, room_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            config,
            tokens,
            transport,
            dispatcher: dispatcher.clone(),
            status: status_tx,
            room_status: room_tx,
            tx: commands.clone(),
            epoch: 0,
            in_flight: false,
            auto_reconnect: false,
            attempts: 0,
            opened_in_session: false,
            link: None,
            retry_timer: None,
            waiters: Vec::new(),
            rooms: RoomTracker::new(),
            app_state: AppState::Active,
        };
        tokio::spawn(driver.run(rx, shutdown.clone()));

        Self {
            inner: Arc::new(Inner {
                commands,
                status: status_rx,
                room: room_rx,
                dispatcher,
                shutdown,
            }),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SyncError::Closed);
        }
        self.inner
            .commands
            .send(DriverMsg::Command(command))
            .map_err(|_| SyncError::Closed)
    }

    /// Connect, resolving once the transport is open.
    ///
    /// Returns immediately if already connected. A call made while another
    /// attempt is in flight joins that attempt instead of opening a second
    /// transport.
    ///
    /// # Errors
    ///
    /// - [`SyncError::AuthMissing`] if no token is available.
    /// - [`SyncError::Transport`] if the first open fails. Automatic retries
    ///   continue in the background.
    /// - [`SyncError::Closed`] if the driver has stopped.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect(Some(reply)))?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Close the transport cleanly and stop automatic reconnects.
    ///
    /// The joined room is kept and rejoined on the next `connect()`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] if the driver has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Disconnect(reply))?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Join a household room, leaving the current one first.
    ///
    /// Deferred until the next successful open when not connected.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] if the driver has stopped.
    pub fn join_room(&self, household_id: impl Into<String>) -> Result<()> {
        self.send(Command::JoinRoom(household_id.into()))
    }

    /// Leave a household room.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] if the driver has stopped.
    pub fn leave_room(&self, household_id: impl Into<String>) -> Result<()> {
        self.send(Command::LeaveRoom(household_id.into()))
    }

    /// Report a foreground/background transition.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] if the driver has stopped.
    pub fn set_app_state(&self, state: AppState) -> Result<()> {
        self.send(Command::SetAppState(state))
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    /// Household currently tracked as the joined room.
    pub fn current_room(&self) -> Option<String> {
        self.inner.room.borrow().clone()
    }

    /// The event dispatcher used by this connection.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Shorthand for [`EventDispatcher::subscribe`].
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, handler)
    }

    /// Shorthand for [`EventDispatcher::on`].
    pub fn on<E, F>(&self, handler: F) -> Subscription
    where
        E: Event,
        F: Fn(&E::Payload) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.dispatcher.on::<E, F>(handler)
    }

    /// Shorthand for [`EventDispatcher::unsubscribe`].
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.dispatcher.unsubscribe(subscription)
    }

    /// Stop the driver. The transport is closed cleanly and later calls
    /// fail with [`SyncError::Closed`].
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver {
    config: SyncConfig,
    tokens: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    status: watch::Sender<ConnectionStatus>,
    room_status: watch::Sender<Option<String>>,
    tx: mpsc::UnboundedSender<DriverMsg>,
    epoch: u64,
    /// A credential lookup or transport open is outstanding.
    in_flight: bool,
    auto_reconnect: bool,
    /// Automatic attempts since the last successful open.
    attempts: u32,
    /// Whether an open already happened since the last `connect()`.
    opened_in_session: bool,
    link: Option<mpsc::UnboundedSender<Frame>>,
    retry_timer: Option<JoinHandle<()>>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    rooms: RoomTracker,
    app_state: AppState,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DriverMsg>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
            }
        }

        debug!("sync driver stopping");
        self.cancel_retry();
        self.close_link(CLIENT_DISCONNECT_REASON);
        self.resolve_waiters(&Err(SyncError::Closed));
    }

    fn handle(&mut self, msg: DriverMsg) {
        match msg {
            DriverMsg::Command(command) => self.handle_command(command),
            DriverMsg::TokenResolved { epoch, token } if epoch == self.epoch => {
                self.on_token(token);
            }
            DriverMsg::Opened { epoch, result } if epoch == self.epoch => {
                self.on_opened(result);
            }
            DriverMsg::Opened { result, .. } => {
                // Superseded attempt; close the late transport right away.
                if let Ok(link) = result {
                    debug!("closing transport from superseded attempt");
                    let _ = link.outbound.send(Frame::Close {
                        code: NORMAL_CLOSURE,
                        reason: CLIENT_DISCONNECT_REASON.to_owned(),
                    });
                }
            }
            DriverMsg::Transport { epoch, event } if epoch == self.epoch => {
                self.on_transport(event);
            }
            DriverMsg::RetryDue { epoch } if epoch == self.epoch => {
                self.retry_timer = None;
                self.start_attempt();
            }
            DriverMsg::TokenResolved { .. }
            | DriverMsg::Transport { .. }
            | DriverMsg::RetryDue { .. } => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply),
            Command::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::JoinRoom(household_id) => {
                let connected = self.is_connected();
                for msg in self.rooms.join(&household_id, connected) {
                    self.send(&msg);
                }
                info!(household_id = %household_id, connected, "joined household room");
                self.publish_room();
            }
            Command::LeaveRoom(household_id) => {
                if let Some(msg) = self.rooms.leave(&household_id, self.is_connected()) {
                    self.send(&msg);
                }
                info!(household_id = %household_id, "left household room");
                self.publish_room();
            }
            Command::SetAppState(next) => {
                let previous = std::mem::replace(&mut self.app_state, next);
                let action = lifecycle_action(
                    previous,
                    next,
                    self.rooms.current().is_some(),
                    &self.config.lifecycle,
                );
                debug!(?previous, ?next, ?action, "app state changed");
                match action {
                    LifecycleAction::Connect => self.connect(None),
                    LifecycleAction::Disconnect => self.disconnect(),
                    LifecycleAction::Nothing => {}
                }
            }
        }
    }

    // -- state helpers ------------------------------------------------------

    fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn is_connected(&self) -> bool {
        self.current_status() == ConnectionStatus::Connected && self.link.is_some()
    }

    fn set_status(&self, next: ConnectionStatus) -> ConnectionStatus {
        let previous = self.status.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection status changed");
        }
        previous
    }

    fn publish_room(&self) {
        self.room_status
            .send_replace(self.rooms.current().map(str::to_owned));
    }

    fn emit(&self, event: SyncEvent) {
        self.dispatcher.dispatch(&event);
    }

    fn emit_connect_error(&self, error: SyncError) {
        self.emit(SyncEvent::ConnectError(ConnectFailure { error }));
    }

    fn resolve_waiters(&mut self, result: &Result<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn send(&self, msg: &ClientMessage) {
        let Some(link) = &self.link else {
            return;
        };
        match msg.to_frame() {
            Ok(text) => {
                if link.send(Frame::Text(text)).is_err() {
                    debug!("transport gone; frame dropped");
                }
            }
            Err(e) => warn!("failed to encode control message: {e}"),
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn close_link(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            let _ = link.send(Frame::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_owned(),
            });
        }
    }

    // -- connect / disconnect ----------------------------------------------

    fn connect(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        if self.is_connected() {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        }

        if let Some(reply) = reply {
            self.waiters.push(reply);
        }
        if self.in_flight {
            debug!("connect requested while an attempt is in flight");
            return;
        }

        // Manual connect: start a fresh retry budget.
        self.cancel_retry();
        self.attempts = 0;
        self.auto_reconnect = true;
        self.start_attempt();
    }

    fn disconnect(&mut self) {
        self.epoch += 1;
        self.cancel_retry();
        self.close_link(CLIENT_DISCONNECT_REASON);
        self.in_flight = false;
        self.auto_reconnect = false;
        self.attempts = 0;
        self.opened_in_session = false;
        self.resolve_waiters(&Err(SyncError::Transport(
            "connection attempt cancelled by disconnect".into(),
        )));

        let previous = self.set_status(ConnectionStatus::Disconnected);
        if previous != ConnectionStatus::Disconnected {
            info!("disconnected by client");
            self.emit(SyncEvent::Disconnect(DisconnectInfo {
                reason: CLIENT_DISCONNECT_REASON.to_owned(),
                code: Some(NORMAL_CLOSURE),
            }));
        }
    }

    fn start_attempt(&mut self) {
        self.epoch += 1;
        self.in_flight = true;
        let epoch = self.epoch;
        let tokens = Arc::clone(&self.tokens);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let token = tokens.get_token().await;
            let _ = tx.send(DriverMsg::TokenResolved { epoch, token });
        });
    }

    /// Stop before opening: nothing was connected, so no retry.
    fn abort_attempt(&mut self, error: SyncError) {
        self.in_flight = false;
        self.auto_reconnect = false;
        self.set_status(ConnectionStatus::Error);
        self.emit_connect_error(error.clone());
        self.resolve_waiters(&Err(error));
    }

    fn on_token(&mut self, token: Result<Option<String>>) {
        let token = match token {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!("no auth token available; not connecting");
                self.abort_attempt(SyncError::AuthMissing);
                return;
            }
            Err(e) => {
                warn!("token lookup failed: {e}");
                self.abort_attempt(SyncError::AuthMissing);
                return;
            }
        };

        let url = match self.config.server.websocket_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("cannot resolve websocket endpoint: {e}");
                self.abort_attempt(e);
                return;
            }
        };

        let endpoint = Endpoint {
            url,
            token,
            auth_mode: self.config.server.auth_mode,
            ping_interval: self.config.keepalive.ping_interval(),
        };

        self.set_status(ConnectionStatus::Connecting);
        info!(url = %endpoint.url, attempt = self.attempts, "connecting");

        let epoch = self.epoch;
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = transport.open(&endpoint).await;
            let _ = tx.send(DriverMsg::Opened { epoch, result });
        });
    }

    fn on_opened(&mut self, result: Result<TransportLink>) {
        self.in_flight = false;
        let link = match result {
            Ok(link) => link,
            Err(e) => {
                warn!(attempt = self.attempts, "transport open failed: {e}");
                if !e.is_retryable() {
                    self.abort_attempt(e);
                    return;
                }
                self.set_status(ConnectionStatus::Disconnected);
                self.emit_connect_error(e.clone());
                self.resolve_waiters(&Err(e));
                self.schedule_retry();
                return;
            }
        };

        let epoch = self.epoch;
        let tx = self.tx.clone();
        let mut inbound = link.inbound;
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let terminal = event.is_terminal();
                if tx.send(DriverMsg::Transport { epoch, event }).is_err() || terminal {
                    return;
                }
            }
            let _ = tx.send(DriverMsg::Transport {
                epoch,
                event: TransportEvent::Closed {
                    code: None,
                    reason: "transport link dropped".into(),
                },
            });
        });

        self.link = Some(link.outbound);
        self.attempts = 0;
        self.set_status(ConnectionStatus::Connected);

        if let Some(join) = self.rooms.replay() {
            debug!(household_id = ?self.rooms.current(), "rejoining household room");
            self.send(&join);
        }

        let event = if self.opened_in_session {
            info!("reconnected");
            SyncEvent::Reconnect
        } else {
            info!("connected");
            SyncEvent::Connect
        };
        self.opened_in_session = true;
        self.emit(event);
        self.resolve_waiters(&Ok(()));
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => match decode_frame(&text) {
                Ok(Some(event)) => {
                    debug!(kind = %event.kind(), household_id = ?event.household_id(), "event received");
                    self.emit(event);
                }
                Ok(None) => debug!("dropping frame with unknown kind"),
                Err(e) => warn!("dropping malformed frame: {e}"),
            },
            TransportEvent::Closed { code, reason } => {
                self.link = None;
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(SyncEvent::Disconnect(DisconnectInfo {
                    reason: reason.clone(),
                    code,
                }));

                if code == Some(NORMAL_CLOSURE) {
                    info!(code, reason = %reason, "server closed connection");
                    self.auto_reconnect = false;
                    self.opened_in_session = false;
                    return;
                }
                warn!(code, reason = %reason, "connection closed abnormally");
                self.schedule_retry();
            }
            TransportEvent::Error(message) => {
                warn!("transport error: {message}");
                self.link = None;
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(SyncEvent::Disconnect(DisconnectInfo {
                    reason: message.clone(),
                    code: None,
                }));
                self.emit_connect_error(SyncError::Transport(message));
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if !self.auto_reconnect {
            return;
        }

        let max = self.config.reconnect.max_attempts;
        if self.attempts >= max {
            warn!(attempts = self.attempts, "giving up reconnecting");
            self.auto_reconnect = false;
            self.set_status(ConnectionStatus::Error);
            self.emit_connect_error(SyncError::RetryExhausted {
                attempts: self.attempts,
            });
            return;
        }

        self.attempts += 1;
        let delay = self.config.reconnect.delay_for(self.attempts);
        info!(
            attempt = self.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );

        let epoch = self.epoch;
        let tx = self.tx.clone();
        self.cancel_retry();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DriverMsg::RetryDue { epoch });
        }));
    }
}
