//! One authenticated ESL session over TCP

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    command::{CommandReply, EslCommand},
    constants::{DEFAULT_TIMEOUT_MS, MAX_EVENT_QUEUE_SIZE, SOCKET_BUF_SIZE},
    error::{EslError, EslResult},
    event::{CallEvent, EventFormat, EventKind},
    protocol::{EslParser, Frame},
};

/// Connection status for one ESL session
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// ESL session is active.
    Connected,
    /// ESL session ended.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Server sent a text/disconnect-notice without linger
    ServerNotice,
    /// TCP or framing error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// Client called disconnect()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Options fixed at connection time.
#[derive(Debug, Clone)]
pub struct EslConnectOptions {
    /// Capacity of the event queue. Default: 1000.
    pub event_queue_size: usize,
    /// How long a command may wait for its reply. `None` waits until the
    /// reply arrives or the connection ends.
    pub command_timeout: Option<Duration>,
    /// TCP connect and handshake timeout.
    pub connect_timeout: Duration,
}

impl Default for EslConnectOptions {
    fn default() -> Self {
        Self {
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
            command_timeout: None,
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// A command written to the socket and still waiting for its reply.
struct PendingCommand {
    summary: String,
    reply: oneshot::Sender<EslResult<CommandReply>>,
}

/// State shared between connection handles and the reader task
struct SharedState {
    /// Replies are matched to commands strictly in write order.
    pending: Mutex<VecDeque<PendingCommand>>,
    /// Set under the `pending` lock once the reader has stopped routing replies.
    closed: AtomicBool,
    status_tx: watch::Sender<ConnectionStatus>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    event_overflow: AtomicBool,
    dropped_event_count: AtomicU64,
}

impl SharedState {
    /// Record the first disconnect reason; later ones are ignored.
    fn mark_disconnected(&self, reason: DisconnectReason) -> bool {
        self.status_tx
            .send_if_modified(|status| {
                if *status == ConnectionStatus::Connected {
                    *status = ConnectionStatus::Disconnected(reason);
                    true
                } else {
                    false
                }
            })
    }

    /// Close the pending queue and fail everything still in it.
    async fn fail_pending(&self) {
        let mut pending = self
            .pending
            .lock()
            .await;
        self.closed
            .store(true, Ordering::Release);
        let count = pending.len();
        for entry in pending.drain(..) {
            let _ = entry
                .reply
                .send(Err(EslError::ConnectionClosed));
        }
        if count > 0 {
            debug!("Failed {} pending command(s): connection closed", count);
        }
    }
}

/// Handle to one ESL session (Clone + Send).
///
/// Commands are serialized through the writer mutex, which is held from
/// write until the reply arrives. The reader task routes replies FIFO to
/// the pending queue and events to [`EslEventStream`].
#[derive(Clone)]
pub struct EslConnection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    shared: Arc<SharedState>,
    status_rx: watch::Receiver<ConnectionStatus>,
    command_timeout: Option<Duration>,
}

impl std::fmt::Debug for EslConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslConnection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Event receiver fed by the reader task (!Clone).
///
/// `Err(EslError::QueueFull)` means events were dropped because the consumer
/// fell behind; other errors are events whose payload could not be decoded.
pub struct EslEventStream {
    rx: mpsc::Receiver<EslResult<CallEvent>>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for EslEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslEventStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(host: &str, port: u16, limit: Duration) -> EslResult<TcpStream> {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(EslError::Io(e))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect timed out after {}ms",
                limit.as_millis()
            );
            Err(EslError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}

/// Read frames off the unsplit stream during the handshake.
async fn recv_frame(
    stream: &mut TcpStream,
    parser: &mut EslParser,
    read_buffer: &mut [u8],
    limit: Duration,
) -> EslResult<Frame> {
    loop {
        if let Some(frame) = parser.next_frame()? {
            trace!("[RECV] Parsed handshake frame: {:?}", frame);
            return Ok(frame);
        }

        let bytes_read = match timeout(limit, stream.read(read_buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(EslError::Io(e)),
            Err(_) => {
                return Err(EslError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        };

        trace!("[RECV] Read {} bytes from socket", bytes_read);
        if bytes_read == 0 {
            return Err(EslError::ConnectionClosed);
        }

        parser.add_data(&read_buffer[..bytes_read])?;
    }
}

async fn authenticate(
    stream: &mut TcpStream,
    parser: &mut EslParser,
    read_buffer: &mut [u8],
    password: &str,
    limit: Duration,
) -> EslResult<()> {
    debug!("[AUTH] Waiting for auth request from FreeSWITCH");
    match recv_frame(stream, parser, read_buffer, limit).await? {
        Frame::AuthRequest => {}
        other => {
            return Err(EslError::protocol_error(format!(
                "Expected auth request, got {:?}",
                other
            )))
        }
    }

    let auth_cmd = EslCommand::Auth {
        password: password.to_string(),
    };
    let command_str = auth_cmd.to_wire_format()?;
    debug!("Sending command: {}", auth_cmd.summary());
    stream
        .write_all(command_str.as_bytes())
        .await?;

    match recv_frame(stream, parser, read_buffer, limit).await? {
        Frame::Reply(reply) if reply.is_success() => {
            debug!("Authentication successful");
            Ok(())
        }
        Frame::Reply(reply) => Err(EslError::auth_failed(
            reply
                .reply_text()
                .unwrap_or("Authentication failed"),
        )),
        Frame::Disconnect { .. } => Err(EslError::auth_failed("server closed during auth")),
        other => Err(EslError::protocol_error(format!(
            "Expected auth reply, got {:?}",
            other
        ))),
    }
}

/// Hand an event (or decode error) to the consumer without blocking.
///
/// A full queue drops the item and raises the overflow flag; the next
/// successful send is preceded by one `QueueFull` notice.
fn dispatch_event(
    event_tx: &mpsc::Sender<EslResult<CallEvent>>,
    shared: &SharedState,
    item: EslResult<CallEvent>,
) -> bool {
    if shared
        .event_overflow
        .load(Ordering::Relaxed)
    {
        match event_tx.try_send(Err(EslError::QueueFull)) {
            Ok(()) => {
                shared
                    .event_overflow
                    .store(false, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
            Err(mpsc::error::TrySendError::Full(_)) => {}
        }
    }

    match event_tx.try_send(item) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
        Err(mpsc::error::TrySendError::Full(_)) => {
            shared
                .event_overflow
                .store(true, Ordering::Relaxed);
            shared
                .dropped_event_count
                .fetch_add(1, Ordering::Relaxed);
            warn!("Event queue full, dropping event");
            true
        }
    }
}

async fn route_reply(shared: &SharedState, reply: CommandReply) {
    let entry = shared
        .pending
        .lock()
        .await
        .pop_front();
    match entry {
        Some(entry) => {
            if entry
                .reply
                .send(Ok(reply))
                .is_err()
            {
                debug!("Discarding late reply for '{}'", entry.summary);
            }
        }
        None => warn!("Received reply but no command is pending"),
    }
}

/// Background reader: runs until EOF, error or disconnect notice, then
/// fails whatever is still pending.
async fn reader_loop(
    reader: OwnedReadHalf,
    parser: EslParser,
    shared: Arc<SharedState>,
    event_tx: mpsc::Sender<EslResult<CallEvent>>,
) {
    let inner = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        parser,
        shared.clone(),
        &event_tx,
    ));
    let reason = match futures_util::FutureExt::catch_unwind(inner).await {
        Ok(reason) => reason,
        Err(_) => {
            tracing::error!("reader task panicked");
            DisconnectReason::IoError("reader task panicked".to_string())
        }
    };
    shared.mark_disconnected(reason);
    shared
        .fail_pending()
        .await;
    // Consumers see the stream end only after the status carries the reason.
    drop(event_tx);
}

async fn reader_loop_inner(
    mut reader: OwnedReadHalf,
    mut parser: EslParser,
    shared: Arc<SharedState>,
    event_tx: &mpsc::Sender<EslResult<CallEvent>>,
) -> DisconnectReason {
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
    let mut events_open = true;

    loop {
        match parser.next_frame() {
            Ok(Some(frame)) => {
                match frame {
                    Frame::Event(item) => {
                        if events_open && !dispatch_event(event_tx, &shared, item) {
                            debug!("Event receiver dropped, continuing with replies only");
                            events_open = false;
                        }
                    }
                    Frame::Reply(reply) => route_reply(&shared, reply).await,
                    Frame::Disconnect { linger: true } => {
                        debug!("Received disconnect notice with linger disposition, ignoring");
                    }
                    Frame::Disconnect { linger: false } => {
                        info!("Received disconnect notice from server");
                        return DisconnectReason::ServerNotice;
                    }
                    Frame::AuthRequest => debug!("Ignoring unexpected auth request"),
                    Frame::Unknown(content_type) => {
                        debug!("Ignoring message with Content-Type {}", content_type)
                    }
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Parser error: {}", e);
                return DisconnectReason::IoError(e.to_string());
            }
        }

        match reader
            .read(&mut read_buffer)
            .await
        {
            Ok(0) => {
                info!("Connection closed (EOF)");
                return DisconnectReason::ConnectionClosed;
            }
            Ok(n) => {
                if let Err(e) = parser.add_data(&read_buffer[..n]) {
                    warn!("Buffer error: {}", e);
                    return DisconnectReason::IoError(e.to_string());
                }
            }
            Err(e) => {
                warn!("Read error: {}", e);
                return DisconnectReason::IoError(e.to_string());
            }
        }
    }
}

impl EslConnection {
    /// Connect to FreeSWITCH (inbound mode) and authenticate with the shared secret.
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        options: EslConnectOptions,
    ) -> EslResult<(Self, EslEventStream)> {
        info!("Connecting to FreeSWITCH at {}:{}", host, port);

        let mut stream = tcp_connect_with_timeout(host, port, options.connect_timeout).await?;
        let mut parser = EslParser::new();
        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

        authenticate(
            &mut stream,
            &mut parser,
            &mut read_buffer,
            password,
            options.connect_timeout,
        )
        .await?;

        info!("Successfully connected and authenticated to FreeSWITCH");
        Ok(Self::split_and_spawn(stream, parser, options))
    }

    fn split_and_spawn(
        stream: TcpStream,
        parser: EslParser,
        options: EslConnectOptions,
    ) -> (Self, EslEventStream) {
        let queue_size = options
            .event_queue_size
            .max(1);

        let (read_half, write_half) = stream.into_split();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let stream_status_rx = status_tx.subscribe();
        let (event_tx, event_rx) = mpsc::channel(queue_size);

        let shared = Arc::new(SharedState {
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            status_tx,
            reader_task: std::sync::Mutex::new(None),
            event_overflow: AtomicBool::new(false),
            dropped_event_count: AtomicU64::new(0),
        });

        let handle = tokio::spawn(reader_loop(read_half, parser, shared.clone(), event_tx));
        if let Ok(mut slot) = shared
            .reader_task
            .lock()
        {
            *slot = Some(handle);
        }

        let connection = EslConnection {
            writer: Arc::new(Mutex::new(write_half)),
            shared,
            status_rx,
            command_timeout: options.command_timeout,
        };

        let events = EslEventStream {
            rx: event_rx,
            status_rx: stream_status_rx,
        };

        (connection, events)
    }

    /// Send a command and wait for its reply.
    ///
    /// The writer lock (FIFO) is held until the reply arrives, so commands
    /// go out one at a time in submission order.
    pub async fn send_command(&self, command: EslCommand) -> EslResult<CommandReply> {
        if !self.is_connected() {
            return Err(EslError::NotConnected);
        }

        let command_str = command.to_wire_format()?;
        let summary = command.summary();
        debug!("Sending command: {}", summary);

        let mut writer = self
            .writer
            .lock()
            .await;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .await;
            if self
                .shared
                .closed
                .load(Ordering::Acquire)
            {
                return Err(EslError::ConnectionClosed);
            }
            pending.push_back(PendingCommand {
                summary: summary.clone(),
                reply: tx,
            });
        }

        if let Err(e) = writer
            .write_all(command_str.as_bytes())
            .await
        {
            // Nothing else can have queued behind us while the writer is held.
            self.shared
                .pending
                .lock()
                .await
                .pop_back();
            return Err(EslError::Io(e));
        }

        let outcome = match self.command_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The slot stays queued so the late reply is not handed
                    // to the next command.
                    warn!(
                        "Command '{}' timed out after {}ms",
                        summary,
                        limit.as_millis()
                    );
                    return Err(EslError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };
        drop(writer);

        let reply = outcome.map_err(|_| EslError::ConnectionClosed)??;
        trace!("Received reply for '{}'", summary);
        Ok(reply)
    }

    /// Execute a blocking API command and return its reply.
    pub async fn api(&self, command: &str) -> EslResult<CommandReply> {
        self.send_command(EslCommand::Api {
            command: command.to_string(),
        })
        .await
    }

    /// Subscribe to events by kind. `EventKind::All` subscribes to everything.
    pub async fn subscribe_events(&self, format: EventFormat, events: &[EventKind]) -> EslResult<()> {
        let events_str = if events.contains(&EventKind::All) {
            EventKind::All
                .as_str()
                .to_string()
        } else {
            events
                .iter()
                .map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        };
        self.subscribe_events_raw(format, &events_str)
            .await
    }

    /// Subscribe using raw event names (e.g. `CUSTOM sofia::register`).
    pub async fn subscribe_events_raw(&self, format: EventFormat, events: &str) -> EslResult<()> {
        let cmd = EslCommand::Events {
            format,
            events: events.to_string(),
        };
        self.send_command(cmd)
            .await?
            .into_result()?;
        info!("Subscribed to events '{}' with format {}", events, format);
        Ok(())
    }

    /// Number of events dropped due to a full event queue.
    pub fn dropped_event_count(&self) -> u64 {
        self.shared
            .dropped_event_count
            .load(Ordering::Relaxed)
    }

    /// Commands written but not yet answered (including timed-out ones).
    pub async fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .await
            .len()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }

    /// Tear the session down: fail pending commands, stop the reader and
    /// shut down the write half. Safe to call more than once.
    pub async fn disconnect(&self) -> EslResult<()> {
        info!("Client requested disconnect");
        self.shared
            .mark_disconnected(DisconnectReason::ClientRequested);
        self.shared
            .fail_pending()
            .await;

        let handle = self
            .shared
            .reader_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
        }

        let mut writer = self
            .writer
            .lock()
            .await;
        writer
            .shutdown()
            .await?;
        Ok(())
    }
}

impl EslEventStream {
    /// Receive the next event, or None once the reader has stopped.
    pub async fn recv(&mut self) -> Option<EslResult<CallEvent>> {
        self.rx
            .recv()
            .await
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }

    /// Current status; after the stream ends this carries the disconnect reason.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }
}

impl futures_util::Stream for EslEventStream {
    type Item = EslResult<CallEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
