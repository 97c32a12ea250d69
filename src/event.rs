//! Call events delivered by the switch

use crate::channel::CallDirection;
use crate::constants::HEADER_CONTENT_LENGTH;
use crate::headers::{ChannelVariable, EventHeader};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Event serialization requested with the `event` subscription command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum EventFormat {
    /// `text/event-plain`, percent-encoded header lines
    #[default]
    Plain,
    /// `text/event-json`
    Json,
}

impl fmt::Display for EventFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFormat::Plain => write!(f, "plain"),
            EventFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for EventFormat {
    type Err = ParseEventFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(ParseEventFormatError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid event format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventFormatError(pub String);

impl fmt::Display for ParseEventFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event format: {}", self.0)
    }
}

impl std::error::Error for ParseEventFormatError {}

/// Error returned when an `Event-Name` is not one of [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventKindError(pub String);

impl fmt::Display for ParseEventKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event name: {}", self.0)
    }
}

impl std::error::Error for ParseEventKindError {}

define_header_enum! {
    error_type: ParseEventKindError,
    /// Event names this client understands. Anything else is still delivered,
    /// with [`CallEvent::kind`] returning `None`.
    pub enum EventKind {
        ChannelCreate => "CHANNEL_CREATE",
        ChannelProgress => "CHANNEL_PROGRESS",
        ChannelProgressMedia => "CHANNEL_PROGRESS_MEDIA",
        ChannelAnswer => "CHANNEL_ANSWER",
        ChannelBridge => "CHANNEL_BRIDGE",
        ChannelUnbridge => "CHANNEL_UNBRIDGE",
        ChannelHold => "CHANNEL_HOLD",
        ChannelUnhold => "CHANNEL_UNHOLD",
        ChannelPark => "CHANNEL_PARK",
        ChannelExecute => "CHANNEL_EXECUTE",
        ChannelHangup => "CHANNEL_HANGUP",
        ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
        ChannelDestroy => "CHANNEL_DESTROY",
        Dtmf => "DTMF",
        RecordStart => "RECORD_START",
        RecordStop => "RECORD_STOP",
        BackgroundJob => "BACKGROUND_JOB",
        Heartbeat => "HEARTBEAT",
        ReloadXml => "RELOADXML",
        Custom => "CUSTOM",
        All => "ALL",
    }
}

impl EventKind {
    /// Lifecycle transitions that get an info-level trace line.
    pub fn is_traced_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::ChannelCreate
                | EventKind::ChannelProgress
                | EventKind::ChannelAnswer
                | EventKind::ChannelHangup
        )
    }
}

/// One event from the switch: a header map plus an optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    kind: Option<EventKind>,
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl CallEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self {
            kind: None,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Create an event of the given kind with `Event-Name` already set.
    pub fn with_kind(kind: EventKind) -> Self {
        let mut event = Self::new();
        event.set_header(EventHeader::EventName, kind.as_str());
        event
    }

    /// Parsed `Event-Name`, if it is one of the known kinds.
    pub fn kind(&self) -> Option<EventKind> {
        self.kind
    }

    /// Raw `Event-Name` header.
    pub fn event_name(&self) -> Option<&str> {
        self.header(EventHeader::EventName)
    }

    pub fn is_kind(&self, kind: EventKind) -> bool {
        self.kind == Some(kind)
    }

    /// Look up a header by name (case-sensitive).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// All headers as a map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Set or overwrite a header. Setting `Event-Name` re-derives [`kind`](Self::kind).
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        if name == EventHeader::EventName.as_str() {
            self.kind = value
                .parse()
                .ok();
        }
        self.headers
            .insert(name.to_string(), value);
    }

    /// Inner body (after the blank line of a plain event).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = Some(body.into());
    }

    /// `Unique-ID` header, falling back to `Caller-Unique-ID`.
    pub fn unique_id(&self) -> Option<&str> {
        self.header(EventHeader::UniqueId)
            .or_else(|| self.header(EventHeader::CallerUniqueId))
    }

    /// Channel variable exposed as `variable_<name>`.
    pub fn variable(&self, name: impl AsRef<str>) -> Option<&str> {
        let key = format!("variable_{}", name.as_ref());
        self.header(&key)
    }

    /// `Hangup-Cause` header (e.g. `NORMAL_CLEARING`, `USER_BUSY`).
    pub fn hangup_cause(&self) -> Option<&str> {
        self.header(EventHeader::HangupCause)
    }

    /// `Call-Direction`, or the `direction` channel variable when absent.
    pub fn call_direction(&self) -> Option<CallDirection> {
        self.header(EventHeader::CallDirection)
            .or_else(|| self.variable(ChannelVariable::Direction))?
            .parse()
            .ok()
    }

    /// Serialize to the plain wire body with percent-encoded values.
    ///
    /// `Event-Name` comes first, the rest sorted for deterministic output.
    /// A stored `Content-Length` is dropped and recomputed from the body.
    pub fn to_plain_format(&self) -> String {
        use std::fmt::Write;
        let mut result = String::new();
        let event_name = EventHeader::EventName.as_str();

        if let Some(name) = self
            .headers
            .get(event_name)
        {
            let _ = writeln!(
                result,
                "{}: {}",
                event_name,
                percent_encode(name.as_bytes(), NON_ALPHANUMERIC)
            );
        }

        let mut rest: Vec<_> = self
            .headers
            .iter()
            .filter(|(k, _)| k.as_str() != event_name && k.as_str() != HEADER_CONTENT_LENGTH)
            .collect();
        rest.sort_by_key(|(k, _)| k.as_str());

        for (key, value) in rest {
            let _ = writeln!(
                result,
                "{}: {}",
                key,
                percent_encode(value.as_bytes(), NON_ALPHANUMERIC)
            );
        }

        match &self.body {
            Some(body) => {
                let _ = writeln!(result, "{}: {}", HEADER_CONTENT_LENGTH, body.len());
                result.push('\n');
                result.push_str(body);
            }
            None => result.push('\n'),
        }

        result
    }
}

impl Default for CallEvent {
    fn default() -> Self {
        Self::new()
    }
}
