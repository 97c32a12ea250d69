//! Call-control client for FreeSWITCH over the Event Socket Library (ESL)
//!
//! The crate keeps one authenticated ESL session to a switch, reconnecting
//! with a fixed delay whenever the link drops, and exposes call control on
//! top of it: origination, hangup, transfer, hold, DTMF, recording, and
//! registration/active-call queries. Finished calls are reported to
//! subscribers as [`CdrRecord`]s built from `CHANNEL_HANGUP_COMPLETE`.
//!
//! # Architecture
//!
//! - [`SwitchSession`] (Clone + Send): connection manager and command surface
//! - [`EslConnection`]: one TCP session; a background reader routes replies
//!   FIFO to waiting commands and events to an [`EslEventStream`]
//! - [`EventDispatcher`]: lifecycle logging and call-end fan-out
//! - [`commands`]: typed builders that render `api` command strings
//!
//! # Example
//!
//! ```rust,no_run
//! use freeswitch_call_control::{DialParams, SwitchConfig, SwitchSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = SwitchSession::new(SwitchConfig::from_env()?)?;
//!
//!     session.on_call_end(|cdr| {
//!         println!(
//!             "{} {} billsec={} cause={:?}",
//!             cdr.uuid,
//!             if cdr.was_answered() { "answered" } else { "missed" },
//!             cdr.billsec,
//!             cdr.hangup_cause
//!         );
//!         Ok(())
//!     });
//!
//!     // Fail-open: returns immediately, retries every 5s until the switch is up.
//!     session.start();
//!
//!     let mut state = session.state_changes();
//!     while !session.is_connected() {
//!         state.changed().await?;
//!     }
//!
//!     let params = DialParams::new("+1 415 555 0100").agent("1001");
//!     let uuid = session.dial_out(&params).await?;
//!     println!("ringing agent, call {}", uuid);
//!
//!     for call in session.get_active_calls().await? {
//!         println!("{} {} {}", call.uuid, call.direction, call.state);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Raw connection
//!
//! [`EslConnection`] can be used on its own when reconnect handling is not
//! wanted:
//!
//! ```rust,no_run
//! use freeswitch_call_control::{EslConnectOptions, EslConnection, EventFormat, EventKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (conn, mut events) =
//!         EslConnection::connect("localhost", 8021, "ClueCon", EslConnectOptions::default())
//!             .await?;
//!
//!     let reply = conn.api("status").await?;
//!     println!("{}", reply.body().unwrap_or(""));
//!
//!     conn.subscribe_events(EventFormat::Plain, &[EventKind::ChannelAnswer])
//!         .await?;
//!     while let Some(Ok(event)) = events.recv().await {
//!         println!("{:?} {:?}", event.kind(), event.unique_id());
//!     }
//!     Ok(())
//! }
//! ```

#[macro_use]
mod macros;

pub mod cdr;
pub mod channel;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod headers;
pub mod session;
pub mod status;

pub(crate) mod buffer;
pub(crate) mod command;
pub mod constants;
mod executor;
pub(crate) mod protocol;

pub use cdr::CdrRecord;
pub use channel::{CallDirection, ParseCallDirectionError};
pub use command::{
    classify_api_output, exists_outcome, expect_ok, extract_call_uuid, originate_outcome,
    CommandReply, ReplyStatus,
};
pub use commands::{
    ApiCommand, Application, DialParams, Endpoint, HoldAction, Originate, PhoneNumber,
    RecordAction, ReloadXml, UuidExists, UuidHold, UuidKill, UuidRecord, UuidSendDtmf,
    UuidTransfer, Variables,
};
pub use config::SwitchConfig;
pub use connection::{
    ConnectionStatus, DisconnectReason, EslConnectOptions, EslConnection, EslEventStream,
};
pub use constants::DEFAULT_ESL_PORT;
pub use dispatcher::{EventDispatcher, SubscriberError, SubscriberId};
pub use error::{EslError, EslResult};
pub use event::{CallEvent, EventFormat, EventKind, ParseEventFormatError, ParseEventKindError};
pub use headers::{ChannelVariable, EventHeader};
pub use session::{ConnectionState, SwitchSession};
pub use status::{ActiveCallRecord, RegistrationInfo};
