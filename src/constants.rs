//! Protocol constants and configuration defaults

use std::time::Duration;

/// Default FreeSWITCH ESL port for inbound connections
pub const DEFAULT_ESL_PORT: u16 = 8021;

/// Default ESL shared secret shipped with FreeSWITCH
pub const DEFAULT_ESL_PASSWORD: &str = "ClueCon";

/// Socket read size (64KB)
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Buffer allocation size (64KB), used for initial allocation and shrink target
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum single message size (8MB), checked against Content-Length
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum unread buffer size (16MB)
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Protocol message terminators
pub const HEADER_TERMINATOR: &str = "\n\n";
pub const LINE_TERMINATOR: &str = "\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_TEXT_EVENT_JSON: &str = "text/event-json";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";

/// Protocol framing header: message kind.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
/// Protocol framing header: body length.
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
/// Protocol framing header: command reply status.
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";
/// Protocol framing header on disconnect notices.
pub const HEADER_CONTENT_DISPOSITION: &str = "Content-Disposition";

/// TCP connect and handshake timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Maximum number of queued events before dropping
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;

/// Delay between a lost connection and the next attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Seconds the switch rings the first leg before giving up
pub const DEFAULT_ORIGINATE_TIMEOUT_SECS: u32 = 60;

/// Shortest dialable number after normalization
pub const MIN_PHONE_DIGITS: usize = 10;

/// Caller-ID name on the agent leg of a click-to-call
pub const DEFAULT_OUTBOUND_CALLER_ID_NAME: &str = "Outbound Call";

/// Longest dialable number (E.164)
pub const MAX_PHONE_DIGITS: usize = 15;
