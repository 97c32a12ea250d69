//! Long-lived switch session with automatic reconnect
//!
//! A [`SwitchSession`] owns at most one authenticated [`EslConnection`] (the
//! link) at a time. Losing the link moves the session to
//! [`ConnectionState::Disconnected`] and arms a single reconnect timer; each
//! successful reconnect builds a fresh connection and event pump.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    cdr::CdrRecord,
    config::SwitchConfig,
    connection::{ConnectionStatus, EslConnection, EslEventStream},
    dispatcher::{EventDispatcher, SubscriberError, SubscriberId},
    error::{EslError, EslResult},
    event::EventKind,
};

/// Lifecycle of a [`SwitchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Link {
    connection: EslConnection,
    generation: u64,
}

pub(crate) struct SessionInner {
    pub(crate) config: SwitchConfig,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    dispatcher: EventDispatcher,
    /// Bumped on every connect attempt and on shutdown; losses reported
    /// by an older generation are stale.
    generation: AtomicU64,
    shut_down: AtomicBool,
    /// Events dropped by links that have since been closed.
    retired_dropped_events: AtomicU64,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for slot in [&self.pump, &self.reconnect] {
            if let Some(handle) = lock(slot).take() {
                handle.abort();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Call-control session against one FreeSWITCH instance (Clone + Send).
///
/// ```rust,no_run
/// use freeswitch_call_control::{DialParams, SwitchConfig, SwitchSession};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = SwitchSession::new(SwitchConfig::from_env()?)?;
///     session.on_call_end(|cdr| {
///         println!("{} ended after {}s", cdr.uuid, cdr.billsec);
///         Ok(())
///     });
///     session.connect().await?;
///
///     let uuid = session
///         .originate_bridge_to_user(&DialParams::new("+14155550100").agent("1001"))
///         .await?;
///     println!("originated {}", uuid);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SwitchSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SwitchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchSession")
            .field("host", &self.inner.config.host)
            .field("esl_port", &self.inner.config.esl_port)
            .field("state", &self.state())
            .finish()
    }
}

impl SwitchSession {
    /// Build an idle session. Nothing touches the network until
    /// [`connect`](Self::connect) or [`start`](Self::start).
    pub fn new(config: SwitchConfig) -> EslResult<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                state_tx,
                link: Mutex::new(None),
                pump: Mutex::new(None),
                reconnect: Mutex::new(None),
                dispatcher: EventDispatcher::new(),
                generation: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                retired_dropped_events: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.inner.config
    }

    /// Connect and authenticate, then subscribe to events.
    ///
    /// A no-op while already connecting or connected. On failure the session
    /// stays disconnected, one reconnect is scheduled and the error returned.
    /// Calling this after [`shutdown`](Self::shutdown) re-enables reconnects.
    pub async fn connect(&self) -> EslResult<()> {
        self.inner
            .shut_down
            .store(false, Ordering::SeqCst);
        self.try_connect()
            .await
    }

    /// Connect in the background without waiting. Failures are logged and
    /// retried; the caller carries on regardless.
    pub fn start(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session
                .connect()
                .await
            {
                debug!("[CONNECT] Initial connect failed: {}", e);
            }
        });
    }

    async fn try_connect(&self) -> EslResult<()> {
        let claimed = self
            .inner
            .state_tx
            .send_if_modified(|state| {
                if *state == ConnectionState::Disconnected {
                    *state = ConnectionState::Connecting;
                    true
                } else {
                    false
                }
            });
        if !claimed {
            debug!("[CONNECT] Already {}, ignoring connect", self.state());
            return Ok(());
        }

        let generation = self
            .inner
            .generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let config = &self.inner.config;
        info!(
            "[CONNECT] Connecting to FreeSWITCH ESL {}:{}...",
            config.host, config.esl_port
        );

        let (connection, events) = match EslConnection::connect(
            &config.host,
            config.esl_port,
            &config.esl_password,
            config.connect_options(),
        )
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!("[CONNECT] ESL connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
                return Err(e);
            }
        };

        if self.is_shut_down() || self.current_generation() != generation {
            debug!("[CONNECT] Session shut down while connecting, closing new link");
            if let Err(e) = connection
                .disconnect()
                .await
            {
                debug!("Error closing ESL socket: {}", e);
            }
            self.set_state(ConnectionState::Disconnected);
            return Err(EslError::ConnectionClosed);
        }

        {
            let mut link = lock(&self.inner.link);
            *link = Some(Link {
                connection: connection.clone(),
                generation,
            });
            self.set_state(ConnectionState::Connected);
        }
        self.cancel_reconnect();
        info!(
            "[CONNECT] ESL connected {}:{}",
            config.host, config.esl_port
        );

        let pump = tokio::spawn(event_pump(Arc::downgrade(&self.inner), events, generation));
        if let Some(old) = lock(&self.inner.pump).replace(pump) {
            old.abort();
        }

        if let Err(e) = connection
            .subscribe_events(config.event_format, &[EventKind::All])
            .await
        {
            warn!("[CONNECT] Event subscription failed: {}", e);
        }
        Ok(())
    }

    /// Stop reconnecting, close the link and fail every outstanding command.
    ///
    /// Safe to call repeatedly and on a session that never connected.
    pub async fn shutdown(&self) {
        info!("[CONNECT] Shutting down FreeSWITCH session");
        self.inner
            .shut_down
            .store(true, Ordering::SeqCst);
        self.inner
            .generation
            .fetch_add(1, Ordering::SeqCst);
        self.cancel_reconnect();

        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        let link = lock(&self.inner.link).take();
        if let Some(link) = link {
            self.retire(&link);
            if let Err(e) = link
                .connection
                .disconnect()
                .await
            {
                debug!("Error closing ESL socket: {}", e);
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Record a lost link once and arm the reconnect timer.
    ///
    /// Reports from a superseded generation, or repeated reports for the
    /// same loss, are ignored.
    pub(crate) fn handle_transport_loss(&self, generation: u64, reason: &str) {
        if generation != self.current_generation() {
            debug!(
                "[CONNECT] Ignoring loss from superseded connection #{}",
                generation
            );
            return;
        }

        let changed = {
            let mut link = lock(&self.inner.link);
            if link
                .as_ref()
                .is_some_and(|l| l.generation == generation)
            {
                if let Some(lost) = link.take() {
                    self.retire(&lost);
                }
            }
            self.set_state(ConnectionState::Disconnected)
        };
        if !changed {
            return;
        }

        warn!("[CONNECT] ESL connection ended: {}", reason);
        self.schedule_reconnect();
    }

    /// Arm the reconnect timer unless one is already pending.
    pub(crate) fn schedule_reconnect(&self) {
        if self.is_shut_down() {
            debug!("[CONNECT] Shut down, not reconnecting");
            return;
        }

        let mut slot = lock(&self.inner.reconnect);
        if slot
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            debug!("[CONNECT] Reconnect already scheduled");
            return;
        }

        let delay = self
            .inner
            .config
            .reconnect_delay();
        info!("[CONNECT] Reconnecting in {}ms", delay.as_millis());

        let weak = Arc::downgrade(&self.inner);
        // The slot lock is held until the handle is stored, so the timer
        // cannot clear the slot before it is filled.
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            lock(&inner.reconnect).take();
            let session = SwitchSession { inner };
            if session.is_shut_down() {
                return;
            }
            if let Err(e) = session
                .try_connect()
                .await
            {
                debug!("[CONNECT] Reconnect attempt failed: {}", e);
            }
        }));
    }

    fn retire(&self, link: &Link) {
        let dropped = link
            .connection
            .dropped_event_count();
        if dropped > 0 {
            warn!(
                "[CONNECT] Link #{} dropped {} events on a full queue",
                link.generation, dropped
            );
        }
        self.inner
            .retired_dropped_events
            .fetch_add(dropped, Ordering::Relaxed);
    }

    /// Events dropped on a full event queue, across every link this session
    /// has opened.
    pub fn dropped_event_count(&self) -> u64 {
        let live = lock(&self.inner.link)
            .as_ref()
            .map_or(0, |link| {
                link.connection
                    .dropped_event_count()
            });
        self.inner
            .retired_dropped_events
            .load(Ordering::Relaxed)
            + live
    }

    fn cancel_reconnect(&self) {
        if let Some(handle) = lock(&self.inner.reconnect).take() {
            handle.abort();
        }
    }

    /// `true` while the reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.reconnect)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self
            .inner
            .state_tx
            .borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner
            .state_tx
            .subscribe()
    }

    /// Register a call-end callback; see [`EventDispatcher::on_call_end`].
    pub fn on_call_end<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&CdrRecord) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .on_call_end(callback)
    }

    pub fn remove_call_end(&self, id: SubscriberId) -> bool {
        self.inner
            .dispatcher
            .remove_call_end(id)
    }

    /// The current link, or `NotConnected` without touching the network.
    pub(crate) fn link(&self) -> EslResult<EslConnection> {
        if !self.is_connected() {
            return Err(EslError::NotConnected);
        }
        lock(&self.inner.link)
            .as_ref()
            .map(|link| {
                link.connection
                    .clone()
            })
            .ok_or(EslError::NotConnected)
    }

    fn is_shut_down(&self) -> bool {
        self.inner
            .shut_down
            .load(Ordering::SeqCst)
    }

    fn current_generation(&self) -> u64 {
        self.inner
            .generation
            .load(Ordering::SeqCst)
    }

    /// Returns `true` if the state actually changed.
    fn set_state(&self, next: ConnectionState) -> bool {
        let mut previous = next;
        let changed = self
            .inner
            .state_tx
            .send_if_modified(|state| {
                if *state == next {
                    return false;
                }
                previous = *state;
                *state = next;
                true
            });
        if changed {
            debug!("Session state: {} -> {}", previous, next);
        }
        changed
    }
}

/// Feed every event of one connection to the dispatcher, then report the loss.
async fn event_pump(inner: Weak<SessionInner>, mut events: EslEventStream, generation: u64) {
    while let Some(item) = events
        .recv()
        .await
    {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner
            .dispatcher
            .handle(item);
    }

    let reason = match events.status() {
        ConnectionStatus::Disconnected(reason) => reason.to_string(),
        _ => "event stream ended".to_string(),
    };
    if let Some(inner) = inner.upgrade() {
        SwitchSession { inner }.handle_transport_loss(generation, &reason);
    }
}
