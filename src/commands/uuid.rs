//! `uuid_*` call-control commands

use super::{validate_token, ApiCommand};
use crate::error::{EslError, EslResult};
use std::fmt;

/// `uuid_kill <uuid> [cause]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidKill {
    pub uuid: String,
    /// Q.850 cause name such as `USER_BUSY`; the switch defaults to `NORMAL_CLEARING`.
    pub cause: Option<String>,
}

impl fmt::Display for UuidKill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uuid_kill {}", self.uuid)?;
        if let Some(cause) = &self.cause {
            write!(f, " {}", cause)?;
        }
        Ok(())
    }
}

impl ApiCommand for UuidKill {
    fn validate(&self) -> EslResult<()> {
        validate_token(&self.uuid, "uuid")?;
        if let Some(cause) = &self.cause {
            validate_token(cause, "hangup cause")?;
        }
        Ok(())
    }
}

/// `uuid_exists <uuid>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidExists {
    pub uuid: String,
}

impl fmt::Display for UuidExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uuid_exists {}", self.uuid)
    }
}

impl ApiCommand for UuidExists {
    fn validate(&self) -> EslResult<()> {
        validate_token(&self.uuid, "uuid")
    }
}

/// `uuid_transfer <uuid> <destination> [dialplan [context]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidTransfer {
    pub uuid: String,
    pub destination: String,
    pub dialplan: Option<String>,
    pub context: Option<String>,
}

impl UuidTransfer {
    pub fn new(uuid: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            destination: destination.into(),
            dialplan: None,
            context: None,
        }
    }

    pub fn dialplan(mut self, dialplan: impl Into<String>) -> Self {
        self.dialplan = Some(dialplan.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for UuidTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uuid_transfer {} {}", self.uuid, self.destination)?;
        // context is positional after dialplan
        match (&self.dialplan, &self.context) {
            (Some(dialplan), Some(context)) => write!(f, " {} {}", dialplan, context),
            (Some(dialplan), None) => write!(f, " {}", dialplan),
            (None, Some(context)) => write!(f, " XML {}", context),
            (None, None) => Ok(()),
        }
    }
}

impl ApiCommand for UuidTransfer {
    fn validate(&self) -> EslResult<()> {
        validate_token(&self.uuid, "uuid")?;
        validate_token(&self.destination, "destination")?;
        if let Some(dialplan) = &self.dialplan {
            validate_token(dialplan, "dialplan")?;
        }
        if let Some(context) = &self.context {
            validate_token(context, "context")?;
        }
        Ok(())
    }
}

/// `uuid_send_dtmf <uuid> <digits>[@<tone_ms>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidSendDtmf {
    pub uuid: String,
    /// `0-9`, `*`, `#`, `A-D`; `w` pauses 500 ms and `W` pauses 1 s.
    pub digits: String,
    pub tone_ms: Option<u32>,
}

impl fmt::Display for UuidSendDtmf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uuid_send_dtmf {} {}", self.uuid, self.digits)?;
        if let Some(ms) = self.tone_ms {
            write!(f, "@{}", ms)?;
        }
        Ok(())
    }
}

impl ApiCommand for UuidSendDtmf {
    fn validate(&self) -> EslResult<()> {
        validate_token(&self.uuid, "uuid")?;
        if self
            .digits
            .is_empty()
        {
            return Err(EslError::invalid_argument("DTMF digits must not be empty"));
        }
        if let Some(bad) = self
            .digits
            .chars()
            .find(|c| !is_dtmf(*c))
        {
            return Err(EslError::invalid_argument(format!(
                "invalid DTMF character {:?} in {:?}",
                bad, self.digits
            )));
        }
        Ok(())
    }
}

fn is_dtmf(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D' | 'a'..='d' | 'w' | 'W')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldAction {
    Hold,
    Unhold,
    Toggle,
}

/// `uuid_hold [off|toggle] <uuid>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidHold {
    pub uuid: String,
    pub action: HoldAction,
}

impl fmt::Display for UuidHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            HoldAction::Hold => write!(f, "uuid_hold {}", self.uuid),
            HoldAction::Unhold => write!(f, "uuid_hold off {}", self.uuid),
            HoldAction::Toggle => write!(f, "uuid_hold toggle {}", self.uuid),
        }
    }
}

impl ApiCommand for UuidHold {
    fn validate(&self) -> EslResult<()> {
        validate_token(&self.uuid, "uuid")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordAction {
    Start { path: String },
    Stop { path: String },
    /// Stop every recording on the channel.
    StopAll,
}

/// `uuid_record <uuid> start|stop <path|all>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidRecord {
    pub uuid: String,
    pub action: RecordAction,
}

impl fmt::Display for UuidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            RecordAction::Start { path } => write!(f, "uuid_record {} start {}", self.uuid, path),
            RecordAction::Stop { path } => write!(f, "uuid_record {} stop {}", self.uuid, path),
            RecordAction::StopAll => write!(f, "uuid_record {} stop all", self.uuid),
        }
    }
}

impl ApiCommand for UuidRecord {
    fn validate(&self) -> EslResult<()> {
        validate_token(&self.uuid, "uuid")?;
        match &self.action {
            RecordAction::Start { path } | RecordAction::Stop { path } => {
                validate_token(path, "recording path")
            }
            RecordAction::StopAll => Ok(()),
        }
    }
}

/// `reloadxml`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadXml;

impl fmt::Display for ReloadXml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("reloadxml")
    }
}

impl ApiCommand for ReloadXml {}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "7f4de4bc-9d10-4a4e-b0a4-3f1e2b8c5d6e";

    #[test]
    fn kill_with_and_without_cause() {
        let kill = UuidKill {
            uuid: UUID.into(),
            cause: None,
        };
        assert_eq!(kill.to_string(), format!("uuid_kill {}", UUID));

        let kill = UuidKill {
            uuid: UUID.into(),
            cause: Some("USER_BUSY".into()),
        };
        assert_eq!(kill.to_string(), format!("uuid_kill {} USER_BUSY", UUID));
        assert!(kill
            .validate()
            .is_ok());
    }

    #[test]
    fn transfer_variants() {
        assert_eq!(
            UuidTransfer::new(UUID, "1002").to_string(),
            format!("uuid_transfer {} 1002", UUID)
        );
        assert_eq!(
            UuidTransfer::new(UUID, "1002")
                .dialplan("XML")
                .context("sales")
                .to_string(),
            format!("uuid_transfer {} 1002 XML sales", UUID)
        );
        assert_eq!(
            UuidTransfer::new(UUID, "1002")
                .context("sales")
                .to_string(),
            format!("uuid_transfer {} 1002 XML sales", UUID)
        );
    }

    #[test]
    fn dtmf_charset() {
        let ok = UuidSendDtmf {
            uuid: UUID.into(),
            digits: "123*#ABwW".into(),
            tone_ms: Some(200),
        };
        assert!(ok
            .validate()
            .is_ok());
        assert_eq!(ok.to_string(), format!("uuid_send_dtmf {} 123*#ABwW@200", UUID));

        for bad in ["", "12E", "1 2", "9\n"] {
            let cmd = UuidSendDtmf {
                uuid: UUID.into(),
                digits: bad.into(),
                tone_ms: None,
            };
            assert!(
                matches!(cmd.validate(), Err(EslError::InvalidArgument { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn hold_actions() {
        let hold = |action| UuidHold {
            uuid: UUID.into(),
            action,
        };
        assert_eq!(hold(HoldAction::Hold).to_string(), format!("uuid_hold {}", UUID));
        assert_eq!(hold(HoldAction::Unhold).to_string(), format!("uuid_hold off {}", UUID));
        assert_eq!(
            hold(HoldAction::Toggle).to_string(),
            format!("uuid_hold toggle {}", UUID)
        );
    }

    #[test]
    fn record_actions() {
        let start = UuidRecord {
            uuid: UUID.into(),
            action: RecordAction::Start {
                path: "/tmp/a.wav".into(),
            },
        };
        assert_eq!(start.to_string(), format!("uuid_record {} start /tmp/a.wav", UUID));

        let stop = UuidRecord {
            uuid: UUID.into(),
            action: RecordAction::StopAll,
        };
        assert_eq!(stop.to_string(), format!("uuid_record {} stop all", UUID));

        let spaced = UuidRecord {
            uuid: UUID.into(),
            action: RecordAction::Start {
                path: "/tmp/my call.wav".into(),
            },
        };
        assert!(spaced
            .validate()
            .is_err());
    }

    #[test]
    fn uuid_with_whitespace_rejected() {
        let exists = UuidExists {
            uuid: "abc def".into(),
        };
        assert!(exists
            .validate()
            .is_err());
        assert_eq!(ReloadXml.to_string(), "reloadxml");
    }
}
