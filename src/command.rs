//! Command wire format and reply classification

use crate::{
    constants::{HEADER_REPLY_TEXT, HEADER_TERMINATOR},
    error::{EslError, EslResult},
    event::EventFormat,
};
use std::collections::HashMap;
use std::fmt;

/// Reject strings with embedded newlines.
///
/// ESL commands are line-delimited; a newline in an argument would let a
/// caller inject a second protocol command.
pub(crate) fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::invalid_argument(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// Reply-Text classification of a `command/reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyStatus {
    /// Reply-Text starts with `+OK` or is absent/empty.
    Ok,
    /// Reply-Text starts with `-ERR`.
    Err,
    /// Reply-Text present but matches neither.
    Other,
}

/// Reply to one command: `command/reply` headers or an `api/response` body.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    headers: HashMap<String, String>,
    body: Option<String>,
    status: ReplyStatus,
}

impl CommandReply {
    /// `ReplyStatus` is derived from the `Reply-Text` header.
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        let status = match headers
            .get(HEADER_REPLY_TEXT)
            .map(|s| s.as_str())
        {
            None | Some("") => ReplyStatus::Ok,
            Some(t) if t.starts_with("+OK") => ReplyStatus::Ok,
            Some(t) if t.starts_with("-ERR") => ReplyStatus::Err,
            Some(_) => ReplyStatus::Other,
        };

        Self {
            headers,
            body,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    pub fn reply_status(&self) -> ReplyStatus {
        self.status
    }

    /// `api/response` payload.
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Raw `Reply-Text` header value (e.g. `+OK accepted`, `-ERR invalid`).
    pub fn reply_text(&self) -> Option<&str> {
        self.headers
            .get(HEADER_REPLY_TEXT)
            .map(|s| s.as_str())
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// The text a caller cares about: the body, else `Reply-Text`, else empty.
    pub fn into_text(self) -> String {
        match self.body {
            Some(body) => body,
            None => self
                .headers
                .get(HEADER_REPLY_TEXT)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Require a `+OK` Reply-Text (auth, event subscription).
    pub fn into_result(self) -> EslResult<Self> {
        match self.status {
            ReplyStatus::Ok => Ok(self),
            ReplyStatus::Err | ReplyStatus::Other => {
                let reply_text = self
                    .reply_text()
                    .unwrap_or("-ERR")
                    .to_string();
                Err(EslError::CommandFailed { reply_text })
            }
        }
    }
}

/// Classify `api` output the way generic execution expects it.
///
/// A `+OK` prefix yields the trimmed remainder, a body containing `-ERR`
/// fails with the trimmed body, anything else comes back verbatim.
pub fn classify_api_output(body: &str) -> EslResult<String> {
    let trimmed = body.trim();
    if let Some(rest) = trimmed.strip_prefix("+OK") {
        return Ok(rest
            .trim()
            .to_string());
    }
    if body.contains("-ERR") {
        return Err(EslError::CommandFailed {
            reply_text: trimmed.to_string(),
        });
    }
    Ok(body.to_string())
}

/// Accept only a `+OK`-prefixed reply.
pub fn expect_ok(body: &str) -> EslResult<()> {
    let trimmed = body.trim();
    if trimmed.starts_with("+OK") {
        Ok(())
    } else {
        Err(EslError::CommandFailed {
            reply_text: trimmed.to_string(),
        })
    }
}

/// Pull the call UUID out of `+OK <uuid>`, matching case-insensitively
/// anywhere in the text.
pub fn extract_call_uuid(body: &str) -> Option<&str> {
    let lower = body.to_ascii_lowercase();
    lower
        .match_indices("+ok")
        .find_map(|(idx, _)| {
            let after = &body[idx + 3..];
            let rest = after.trim_start();
            if rest.len() == after.len() {
                return None;
            }
            let end = rest
                .find(|c: char| !(c.is_ascii_hexdigit() || c == '-'))
                .unwrap_or(rest.len());
            (end > 0).then(|| &rest[..end])
        })
}

/// Interpret originate output: the new UUID, or an error for `-ERR`,
/// or the trimmed text when neither shape matches.
pub fn originate_outcome(body: &str) -> EslResult<String> {
    if let Some(uuid) = extract_call_uuid(body) {
        return Ok(uuid.to_string());
    }
    let trimmed = body.trim();
    if body.contains("-ERR") {
        return Err(EslError::CommandFailed {
            reply_text: trimmed.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// `uuid_exists` answers `true`, sometimes as `+OK true`.
pub fn exists_outcome(body: &str) -> bool {
    matches!(body.trim(), "true" | "+OK true")
}

/// Commands this client writes on the socket.
#[derive(Clone)]
pub enum EslCommand {
    /// Authenticate with the shared secret
    Auth { password: String },
    /// Blocking API command, answered by `api/response`
    Api { command: String },
    /// Subscribe to events
    Events { format: EventFormat, events: String },
}

impl fmt::Debug for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::Api { command } => f
                .debug_struct("Api")
                .field("command", command)
                .finish(),
            EslCommand::Events { format, events } => f
                .debug_struct("Events")
                .field("format", format)
                .field("events", events)
                .finish(),
        }
    }
}

impl EslCommand {
    fn format_simple_command(cmd: &str, args: &[&str]) -> String {
        let mut result = String::from(cmd);
        for arg in args {
            result.push(' ');
            result.push_str(arg);
        }
        result.push_str(HEADER_TERMINATOR);
        result
    }

    /// Validate user-supplied fields, then render the wire bytes.
    pub fn to_wire_format(&self) -> EslResult<String> {
        match self {
            EslCommand::Auth { password } => {
                validate_no_newlines(password, "password")?;
                Ok(Self::format_simple_command("auth", &[password]))
            }
            EslCommand::Api { command } => {
                validate_no_newlines(command, "api command")?;
                Ok(Self::format_simple_command("api", &[command]))
            }
            EslCommand::Events { format, events } => {
                validate_no_newlines(events, "event list")?;
                Ok(Self::format_simple_command(
                    "event",
                    &[&format.to_string(), events],
                ))
            }
        }
    }

    /// Log-safe one-line summary.
    pub fn summary(&self) -> String {
        match self {
            EslCommand::Auth { .. } => "auth [REDACTED]".to_string(),
            EslCommand::Api { command } => format!("api {}", command),
            EslCommand::Events { format, events } => format!("event {} {}", format, events),
        }
    }
}
