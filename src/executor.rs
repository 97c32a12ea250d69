//! Command execution on a [`SwitchSession`]

use tracing::{debug, info};

use crate::{
    command::{classify_api_output, exists_outcome, expect_ok, originate_outcome},
    commands::{
        bridge_to_user, click_to_call, echo_test, park, ApiCommand, DialParams, HoldAction,
        Originate, RecordAction, ReloadXml, UuidExists, UuidHold, UuidKill, UuidRecord,
        UuidSendDtmf, UuidTransfer,
    },
    error::EslResult,
    session::SwitchSession,
};

impl SwitchSession {
    /// Run an `api` command and return the raw reply body.
    ///
    /// Fails with `NotConnected` immediately, without touching the network,
    /// when the session has no link.
    pub async fn api(&self, command: &str) -> EslResult<String> {
        let link = self.link()?;
        let reply = link
            .api(command)
            .await?;
        Ok(reply.into_text())
    }

    /// Run an `api` command and classify its output.
    ///
    /// `+OK <rest>` yields the trimmed rest, output containing `-ERR` becomes
    /// [`EslError::CommandFailed`](crate::EslError::CommandFailed), anything
    /// else is returned verbatim.
    pub async fn execute(&self, command: &str) -> EslResult<String> {
        let body = self
            .api(command)
            .await?;
        classify_api_output(&body)
    }

    /// Validate and send a typed command, returning the raw reply body.
    pub async fn send<C: ApiCommand>(&self, command: &C) -> EslResult<String> {
        command.validate()?;
        self.api(&command.to_string())
            .await
    }

    /// Send an `originate` and return the new call's UUID.
    pub async fn originate(&self, command: &Originate) -> EslResult<String> {
        info!("[ORIGINATE] {}", command);
        let body = self
            .send(command)
            .await?;
        let uuid = originate_outcome(&body)?;
        debug!("[ORIGINATE] switch answered {}", uuid);
        Ok(uuid)
    }

    /// Call `destination` through the gateway and echo its audio back.
    pub async fn originate_echo(&self, destination: &str) -> EslResult<String> {
        let command = echo_test(self.config(), destination)?;
        self.originate(&command)
            .await
    }

    /// Call out through the gateway and park the answered leg.
    pub async fn originate_park(&self, params: &DialParams) -> EslResult<String> {
        let command = park(self.config(), params)?;
        self.originate(&command)
            .await
    }

    /// Call the destination and bridge it to the agent extension once
    /// answered. Caller ID and ring timeout come from `params`.
    pub async fn originate_bridge_to_user(&self, params: &DialParams) -> EslResult<String> {
        let command = bridge_to_user(self.config(), params)?;
        self.originate(&command)
            .await
    }

    /// Click-to-call: ring the agent, then dial the customer.
    pub async fn dial_out(&self, params: &DialParams) -> EslResult<String> {
        let command = click_to_call(self.config(), params)?;
        self.originate(&command)
            .await
    }

    async fn send_expect_ok<C: ApiCommand>(&self, command: &C) -> EslResult<()> {
        let body = self
            .send(command)
            .await?;
        expect_ok(&body)
    }

    pub async fn hangup(&self, uuid: &str) -> EslResult<()> {
        self.send_expect_ok(&UuidKill {
            uuid: uuid.to_string(),
            cause: None,
        })
        .await
    }

    /// Hang up with a specific cause such as `USER_BUSY` or `CALL_REJECTED`.
    pub async fn hangup_with_cause(&self, uuid: &str, cause: &str) -> EslResult<()> {
        self.send_expect_ok(&UuidKill {
            uuid: uuid.to_string(),
            cause: Some(cause.to_string()),
        })
        .await
    }

    /// Whether the switch still has a channel with this UUID.
    pub async fn exists(&self, uuid: &str) -> EslResult<bool> {
        let body = self
            .send(&UuidExists {
                uuid: uuid.to_string(),
            })
            .await?;
        Ok(exists_outcome(&body))
    }

    /// Send the call to `destination` in its current dialplan and context.
    pub async fn transfer(&self, uuid: &str, destination: &str) -> EslResult<()> {
        self.transfer_with(&UuidTransfer::new(uuid, destination))
            .await
    }

    /// Transfer with an explicit dialplan and context.
    pub async fn transfer_with(&self, transfer: &UuidTransfer) -> EslResult<()> {
        self.send_expect_ok(transfer)
            .await
    }

    pub async fn send_dtmf(&self, uuid: &str, digits: &str) -> EslResult<()> {
        self.send_expect_ok(&UuidSendDtmf {
            uuid: uuid.to_string(),
            digits: digits.to_string(),
            tone_ms: None,
        })
        .await
    }

    pub async fn hold(&self, uuid: &str) -> EslResult<()> {
        self.send_expect_ok(&UuidHold {
            uuid: uuid.to_string(),
            action: HoldAction::Hold,
        })
        .await
    }

    pub async fn unhold(&self, uuid: &str) -> EslResult<()> {
        self.send_expect_ok(&UuidHold {
            uuid: uuid.to_string(),
            action: HoldAction::Unhold,
        })
        .await
    }

    /// Start recording a call and return the file path used.
    ///
    /// Without `path` the file lands in the configured recording directory
    /// as `<uuid>.wav`.
    pub async fn start_recording(&self, uuid: &str, path: Option<&str>) -> EslResult<String> {
        let path = match path {
            Some(path) => path.to_string(),
            None => format!(
                "{}/{}.wav",
                self.config()
                    .recording_dir
                    .trim_end_matches('/'),
                uuid
            ),
        };
        self.send_expect_ok(&UuidRecord {
            uuid: uuid.to_string(),
            action: RecordAction::Start { path: path.clone() },
        })
        .await?;
        Ok(path)
    }

    /// Stop every recording on the call.
    pub async fn stop_recording(&self, uuid: &str) -> EslResult<()> {
        self.send_expect_ok(&UuidRecord {
            uuid: uuid.to_string(),
            action: RecordAction::StopAll,
        })
        .await
    }

    /// Reload the switch's XML configuration.
    pub async fn reload_xml(&self) -> EslResult<()> {
        self.send_expect_ok(&ReloadXml)
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::{DialParams, EslError, SwitchConfig, SwitchSession};

    fn idle() -> SwitchSession {
        SwitchSession::new(SwitchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn every_operation_requires_a_link() {
        let session = idle();
        assert!(matches!(session.hangup("u").await, Err(EslError::NotConnected)));
        assert!(matches!(session.exists("u").await, Err(EslError::NotConnected)));
        assert!(matches!(session.hold("u").await, Err(EslError::NotConnected)));
        assert!(matches!(session.reload_xml().await, Err(EslError::NotConnected)));
        assert!(matches!(
            session
                .originate_bridge_to_user(&DialParams::new("14155550100").agent("1001"))
                .await,
            Err(EslError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn argument_errors_precede_connection_check() {
        let session = idle();
        assert!(matches!(
            session
                .originate_echo("555")
                .await,
            Err(EslError::InvalidNumber { .. })
        ));
        assert!(matches!(
            session
                .send_dtmf("u", "12X")
                .await,
            Err(EslError::InvalidArgument { .. })
        ));
    }
}
