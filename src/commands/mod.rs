//! Typed builders for `api` command strings.
//!
//! Every builder renders its command text through `Display`; nothing here
//! performs I/O. The [`SwitchSession`](crate::SwitchSession) wrappers send them.

pub mod originate;
pub mod uuid;

pub use originate::{
    bridge_to_user, click_to_call, echo_test, park, Application, DialParams, Endpoint, Originate,
    PhoneNumber, Variables,
};
pub use uuid::{
    HoldAction, RecordAction, ReloadXml, UuidExists, UuidHold, UuidKill, UuidRecord,
    UuidSendDtmf, UuidTransfer,
};

use crate::error::{EslError, EslResult};
use std::fmt::Display;

/// A command that can be sent with `api`.
pub trait ApiCommand: Display {
    /// Reject arguments that would render an ambiguous or injected command.
    fn validate(&self) -> EslResult<()> {
        Ok(())
    }
}

/// Arguments are space-separated on the wire, so each must be one token.
pub(crate) fn validate_token(value: &str, what: &str) -> EslResult<()> {
    if value.is_empty() {
        return Err(EslError::invalid_argument(format!("{} must not be empty", what)));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(EslError::invalid_argument(format!(
            "{} must not contain whitespace: {:?}",
            what, value
        )));
    }
    Ok(())
}
