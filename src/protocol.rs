//! ESL framing and decode into typed frames

use crate::{
    buffer::EslBuffer,
    command::CommandReply,
    constants::{
        CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
        CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_TEXT_EVENT_JSON,
        CONTENT_TYPE_TEXT_EVENT_PLAIN, HEADER_CONTENT_DISPOSITION, HEADER_CONTENT_LENGTH,
        HEADER_CONTENT_TYPE, HEADER_TERMINATOR, MAX_MESSAGE_SIZE,
    },
    error::{EslError, EslResult},
    event::{CallEvent, EventFormat},
};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use tracing::debug;

/// ESL message types
#[derive(Debug, Clone, PartialEq)]
pub enum MessageType {
    AuthRequest,
    CommandReply,
    ApiResponse,
    Event(EventFormat),
    Disconnect,
    Unknown(String),
}

impl MessageType {
    /// Parse message type from Content-Type header
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            CONTENT_TYPE_AUTH_REQUEST => MessageType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => MessageType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => MessageType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN => MessageType::Event(EventFormat::Plain),
            CONTENT_TYPE_TEXT_EVENT_JSON => MessageType::Event(EventFormat::Json),
            CONTENT_TYPE_DISCONNECT_NOTICE => MessageType::Disconnect,
            _ => MessageType::Unknown(content_type.to_string()),
        }
    }
}

/// One framed message: envelope headers plus optional body.
#[derive(Debug, Clone)]
pub struct EslMessage {
    pub message_type: MessageType,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl EslMessage {
    pub fn new(
        message_type: MessageType,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Self {
        Self {
            message_type,
            headers,
            body,
        }
    }

    pub fn into_reply(self) -> CommandReply {
        CommandReply::new(self.headers, self.body)
    }
}

/// A decoded inbound message. Everything past the reader task sees only these.
#[derive(Debug)]
pub enum Frame {
    /// Greeting asking for the shared secret.
    AuthRequest,
    /// Reply to the oldest outstanding command (`command/reply` or `api/response`).
    Reply(CommandReply),
    /// An event, or the reason its payload could not be decoded.
    Event(EslResult<CallEvent>),
    /// The switch is about to close the socket; `linger` means events may still follow.
    Disconnect { linger: bool },
    /// Content-Type this client does not handle.
    Unknown(String),
}

impl Frame {
    /// Classify a framed message. Event payload errors are kept inside
    /// [`Frame::Event`] so one bad event does not poison the stream.
    pub fn decode(message: EslMessage) -> Self {
        match message.message_type {
            MessageType::AuthRequest => Frame::AuthRequest,
            MessageType::CommandReply | MessageType::ApiResponse => {
                Frame::Reply(message.into_reply())
            }
            MessageType::Event(format) => Frame::Event(parse_event(message, format)),
            MessageType::Disconnect => {
                let linger = message
                    .headers
                    .get(HEADER_CONTENT_DISPOSITION)
                    .is_some_and(|d| d == "linger");
                Frame::Disconnect { linger }
            }
            MessageType::Unknown(content_type) => Frame::Unknown(content_type),
        }
    }
}

/// Parser state for handling incomplete messages
#[derive(Debug)]
enum ParseState {
    WaitingForHeaders,
    WaitingForBody {
        message_type: MessageType,
        headers: HashMap<String, String>,
        body_length: usize,
    },
}

/// Incremental ESL parser fed from the socket.
pub struct EslParser {
    buffer: EslBuffer,
    state: ParseState,
}

impl EslParser {
    pub fn new() -> Self {
        Self {
            buffer: EslBuffer::new(),
            state: ParseState::WaitingForHeaders,
        }
    }

    pub fn add_data(&mut self, data: &[u8]) -> EslResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()?;
        Ok(())
    }

    /// Next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> EslResult<Option<Frame>> {
        Ok(self
            .parse_message()?
            .map(Frame::decode))
    }

    /// Try to parse a complete message from the buffer
    pub fn parse_message(&mut self) -> EslResult<Option<EslMessage>> {
        loop {
            match &self.state {
                ParseState::WaitingForHeaders => {
                    let Some(headers_data) = self
                        .buffer
                        .extract_until_pattern(HEADER_TERMINATOR.as_bytes())
                    else {
                        return Ok(None);
                    };
                    self.buffer
                        .compact();

                    let headers_str = String::from_utf8(headers_data)
                        .map_err(|_| EslError::protocol_error("Invalid UTF-8 in headers"))?;
                    let headers = parse_headers(&headers_str)?;

                    // A message without Content-Type means the stream is desynchronized.
                    let content_type = headers
                        .get(HEADER_CONTENT_TYPE)
                        .ok_or_else(|| {
                            EslError::protocol_error(
                                "Missing Content-Type header, stream out of sync",
                            )
                        })?;
                    let message_type = MessageType::from_content_type(content_type);

                    let body_length = match headers.get(HEADER_CONTENT_LENGTH) {
                        Some(raw) => raw
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| EslError::InvalidHeader {
                                header: format!("{}: {}", HEADER_CONTENT_LENGTH, raw),
                            })?,
                        None => 0,
                    };

                    if body_length > MAX_MESSAGE_SIZE {
                        return Err(EslError::protocol_error(format!(
                            "Message too large: Content-Length {} exceeds limit {}",
                            body_length, MAX_MESSAGE_SIZE
                        )));
                    }

                    if body_length == 0 {
                        return Ok(Some(EslMessage::new(message_type, headers, None)));
                    }

                    self.state = ParseState::WaitingForBody {
                        message_type,
                        headers,
                        body_length,
                    };
                }
                ParseState::WaitingForBody { body_length, .. } => {
                    let Some(body_data) = self
                        .buffer
                        .extract_bytes(*body_length)
                    else {
                        return Ok(None);
                    };
                    self.buffer
                        .compact();

                    // Content-Length was honoured, so framing is intact either way
                    let body = String::from_utf8(body_data).unwrap_or_else(|e| {
                        debug!("Non UTF-8 body of {} bytes, decoding lossily", e.as_bytes().len());
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    });

                    let state = std::mem::replace(&mut self.state, ParseState::WaitingForHeaders);
                    if let ParseState::WaitingForBody {
                        message_type,
                        headers,
                        ..
                    } = state
                    {
                        return Ok(Some(EslMessage::new(message_type, headers, Some(body))));
                    }
                }
            }
        }
    }
}

impl Default for EslParser {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_value(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Split a `Key: value` line, percent-decoding the value.
fn split_header_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    Some((
        key.trim()
            .to_string(),
        decode_value(value.trim()),
    ))
}

fn parse_headers(headers_str: &str) -> EslResult<HashMap<String, String>> {
    let mut headers = HashMap::new();

    for line in headers_str.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = split_header_line(line).ok_or_else(|| EslError::InvalidHeader {
            header: line.to_string(),
        })?;
        headers.insert(key, value);
    }

    Ok(headers)
}

/// Decode an event payload in the given format.
pub fn parse_event(message: EslMessage, format: EventFormat) -> EslResult<CallEvent> {
    match format {
        EventFormat::Plain => parse_plain_event(message),
        EventFormat::Json => parse_json_event(message),
    }
}

/// Plain events nest a second header block inside the envelope body:
/// percent-encoded `Key: value` lines, a blank line, then an optional
/// inner body.
fn parse_plain_event(message: EslMessage) -> EslResult<CallEvent> {
    let body = message
        .body
        .as_deref()
        .ok_or_else(|| EslError::protocol_error("Plain event missing body"))?;

    let (header_section, inner_body) = match body.split_once("\n\n") {
        Some((head, rest)) => (head, Some(rest)),
        None => (body, None),
    };

    let mut event = CallEvent::new();
    for line in header_section.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Malformed lines inside an event are skipped rather than failing the event.
        if let Some((key, value)) = split_header_line(line) {
            event.set_header(key, value);
        }
    }

    if let Some(inner) = inner_body.filter(|b| !b.is_empty()) {
        event.set_body(inner);
    }

    if event
        .event_name()
        .is_none()
    {
        return Err(EslError::protocol_error("Event without Event-Name"));
    }

    Ok(event)
}

fn parse_json_event(message: EslMessage) -> EslResult<CallEvent> {
    let body = message
        .body
        .ok_or_else(|| EslError::protocol_error("JSON event missing body"))?;

    let json_value: serde_json::Value = serde_json::from_str(&body)?;
    let obj = json_value
        .as_object()
        .ok_or_else(|| EslError::protocol_error("JSON event is not an object"))?;

    let mut event = CallEvent::new();
    for (key, value) in obj {
        if key == "_body" {
            if let Some(text) = value.as_str() {
                event.set_body(text);
            }
            continue;
        }
        let value_str = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        event.set_header(key, value_str);
    }

    if event
        .event_name()
        .is_none()
    {
        return Err(EslError::protocol_error("Event without Event-Name"));
    }

    Ok(event)
}
