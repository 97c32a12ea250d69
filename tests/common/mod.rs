//! In-process fake FreeSWITCH speaking just enough inbound ESL for tests.

#![allow(dead_code)]

use freeswitch_call_control::{CallEvent, ConnectionState, SwitchConfig, SwitchSession};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const PASSWORD: &str = "ClueCon";
pub const WAIT: Duration = Duration::from_secs(5);

/// How the fake switch answers one `api` command.
pub enum Reply {
    /// `api/response` with this body.
    Api(String),
    /// Never answer.
    Silent,
    /// Close the socket instead of answering.
    Close,
}

pub fn api(body: &str) -> Reply {
    Reply::Api(body.to_string())
}

enum Control {
    Write(String),
    Drop,
}

type Responder = dyn Fn(&str) -> Reply + Send + Sync;

pub struct FakeSwitch {
    pub port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    control: Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>,
}

impl FakeSwitch {
    /// Serve every connection; `responder` sees each `api` command without
    /// the `api ` prefix. Other commands get `+OK`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        let switch = Self {
            port,
            commands: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
            control: Arc::new(Mutex::new(None)),
        };

        let responder: Arc<Responder> = Arc::new(responder);
        let commands = switch
            .commands
            .clone();
        let connections = switch
            .connections
            .clone();
        let control = switch
            .control
            .clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener
                .accept()
                .await
            {
                let (tx, rx) = mpsc::unbounded_channel();
                *control
                    .lock()
                    .unwrap() = Some(tx);
                tokio::spawn(serve(
                    socket,
                    responder.clone(),
                    commands.clone(),
                    connections.clone(),
                    rx,
                ));
            }
        });
        switch
    }

    /// Answers every `api` command with `+OK`.
    pub async fn start_default() -> Self {
        Self::start(|_| api("+OK\n")).await
    }

    pub fn config(&self) -> SwitchConfig {
        SwitchConfig {
            host: "127.0.0.1".into(),
            esl_port: self.port,
            esl_password: PASSWORD.into(),
            gateway: "telnyx".into(),
            caller_id_number: "+14155550000".into(),
            domain: "pbx.local".into(),
            reconnect_delay_ms: 100,
            ..Default::default()
        }
    }

    pub fn session(&self) -> SwitchSession {
        SwitchSession::new(self.config()).unwrap()
    }

    /// Every command received after authentication, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .clone()
    }

    pub fn api_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| {
                c.strip_prefix("api ")
                    .map(str::to_string)
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .load(Ordering::SeqCst)
    }

    pub fn send_event(&self, event: &CallEvent) {
        let body = event.to_plain_format();
        self.send_raw(format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        ));
    }

    pub fn send_raw(&self, frame: String) {
        if let Some(tx) = self
            .control
            .lock()
            .unwrap()
            .as_ref()
        {
            let _ = tx.send(Control::Write(frame));
        }
    }

    /// Close the current client connection from the switch side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self
            .control
            .lock()
            .unwrap()
            .take()
        {
            let _ = tx.send(Control::Drop);
        }
    }

    pub async fn wait_for_connections(&self, count: usize) {
        timeout(WAIT, async {
            while self.connection_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("switch never saw the expected connections");
    }
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
    let mut line = String::new();
    if reader
        .read_line(&mut line)
        .await
        .ok()?
        == 0
    {
        return None;
    }
    let mut blank = String::new();
    reader
        .read_line(&mut blank)
        .await
        .ok()?;
    Some(
        line.trim_end()
            .to_string(),
    )
}

fn api_frame(body: &str) -> String {
    format!(
        "Content-Type: api/response\nContent-Length: {}\n\n{}",
        body.len(),
        body
    )
}

fn command_reply(text: &str) -> String {
    format!("Content-Type: command/reply\nReply-Text: {}\n\n", text)
}

async fn serve(
    socket: TcpStream,
    responder: Arc<Responder>,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    if write
        .write_all(b"Content-Type: auth/request\n\n")
        .await
        .is_err()
    {
        return;
    }
    let Some(auth) = read_command(&mut reader).await else {
        return;
    };
    if auth != format!("auth {}", PASSWORD) {
        let _ = write
            .write_all(command_reply("-ERR invalid").as_bytes())
            .await;
        return;
    }
    if write
        .write_all(command_reply("+OK accepted").as_bytes())
        .await
        .is_err()
    {
        return;
    }
    connections.fetch_add(1, Ordering::SeqCst);

    // read_line is not cancel-safe, so commands are read on their own task
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(cmd) = read_command(&mut reader).await {
            if cmd_tx
                .send(cmd)
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return };
                commands
                    .lock()
                    .unwrap()
                    .push(cmd.clone());
                let frame = match cmd.strip_prefix("api ") {
                    Some(api_cmd) => match responder(api_cmd) {
                        Reply::Api(body) => Some(api_frame(&body)),
                        Reply::Silent => None,
                        Reply::Close => return,
                    },
                    None => Some(command_reply("+OK")),
                };
                if let Some(frame) = frame {
                    if write.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            ctl = control.recv() => match ctl {
                Some(Control::Write(frame)) => {
                    if write.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Some(Control::Drop) | None => return,
            },
        }
    }
}

/// Wait until the session reports `want`.
pub async fn wait_for_state(session: &SwitchSession, want: ConnectionState) {
    let mut changes = session.state_changes();
    timeout(WAIT, async {
        loop {
            if *changes.borrow_and_update() == want {
                return;
            }
            if changes
                .changed()
                .await
                .is_err()
            {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {}", want));
}

/// A port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    listener
        .local_addr()
        .unwrap()
        .port()
}
