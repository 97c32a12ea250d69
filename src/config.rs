//! Switch connection and call-routing settings
//!
//! Values come from `FS_*` environment variables with defaults that match a
//! stock FreeSWITCH install. [`SwitchConfig::from_env_map`] takes an explicit
//! map so tests never touch the process environment.

use crate::{
    constants::{
        DEFAULT_ESL_PASSWORD, DEFAULT_ESL_PORT, DEFAULT_RECONNECT_DELAY, MAX_EVENT_QUEUE_SIZE,
    },
    connection::EslConnectOptions,
    error::{EslError, EslResult},
    event::EventFormat,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Settings for one [`SwitchSession`](crate::SwitchSession).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub host: String,
    pub esl_port: u16,
    pub esl_password: String,
    /// SIP trunk used for PSTN legs.
    pub gateway: String,
    /// Default outbound caller ID; left off the dial string when empty.
    pub caller_id_number: String,
    /// Domain of locally registered users (`user/<ext>@<domain>`).
    pub domain: String,
    pub default_agent_extension: String,
    /// Sofia profile queried for registrations.
    pub sip_profile: String,
    pub recording_dir: String,
    pub reconnect_delay_ms: u64,
    /// Per-command reply timeout. Unset means wait for the reply or the link to drop.
    pub command_timeout_ms: Option<u64>,
    pub event_format: EventFormat,
    pub event_queue_size: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            esl_port: DEFAULT_ESL_PORT,
            esl_password: DEFAULT_ESL_PASSWORD.to_string(),
            gateway: "default".to_string(),
            caller_id_number: String::new(),
            domain: "localhost".to_string(),
            default_agent_extension: "1001".to_string(),
            sip_profile: "internal".to_string(),
            recording_dir: "/var/lib/freeswitch/recordings".to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            command_timeout_ms: None,
            event_format: EventFormat::Plain,
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
        }
    }
}

impl std::fmt::Debug for SwitchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchConfig")
            .field("host", &self.host)
            .field("esl_port", &self.esl_port)
            .field("esl_password", &"[REDACTED]")
            .field("gateway", &self.gateway)
            .field("caller_id_number", &self.caller_id_number)
            .field("domain", &self.domain)
            .field("default_agent_extension", &self.default_agent_extension)
            .field("sip_profile", &self.sip_profile)
            .field("recording_dir", &self.recording_dir)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("event_format", &self.event_format)
            .field("event_queue_size", &self.event_queue_size)
            .finish()
    }
}

fn parse_var<T: FromStr>(env: &HashMap<String, String>, name: &str) -> EslResult<Option<T>> {
    match env
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
    {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| EslError::invalid_config(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(None),
    }
}

fn string_var(env: &HashMap<String, String>, name: &str, target: &mut String) {
    if let Some(value) = env
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
    {
        *target = value.to_string();
    }
}

impl SwitchConfig {
    /// Load from the process environment.
    pub fn from_env() -> EslResult<Self> {
        Self::from_env_map(&std::env::vars().collect())
    }

    /// Load from a provided map (useful for testing).
    pub fn from_env_map(env: &HashMap<String, String>) -> EslResult<Self> {
        let mut config = Self::default();

        string_var(env, "FS_HOST", &mut config.host);
        string_var(env, "FS_ESL_PASSWORD", &mut config.esl_password);
        string_var(env, "FS_GATEWAY", &mut config.gateway);
        string_var(env, "FS_CALLER_ID", &mut config.caller_id_number);
        string_var(env, "FS_DOMAIN", &mut config.domain);
        string_var(env, "FS_DEFAULT_EXTENSION", &mut config.default_agent_extension);
        string_var(env, "FS_SIP_PROFILE", &mut config.sip_profile);
        string_var(env, "FS_RECORDING_DIR", &mut config.recording_dir);

        if let Some(port) = parse_var(env, "FS_ESL_PORT")? {
            config.esl_port = port;
        }
        if let Some(delay) = parse_var(env, "FS_RECONNECT_DELAY_MS")? {
            config.reconnect_delay_ms = delay;
        }
        if let Some(limit) = parse_var(env, "FS_COMMAND_TIMEOUT_MS")? {
            config.command_timeout_ms = Some(limit);
        }
        if let Some(format) = parse_var(env, "FS_EVENT_FORMAT")? {
            config.event_format = format;
        }
        if let Some(size) = parse_var(env, "FS_EVENT_QUEUE_SIZE")? {
            config.event_queue_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce a working session.
    pub fn validate(&self) -> EslResult<()> {
        if self
            .host
            .trim()
            .is_empty()
        {
            return Err(EslError::invalid_config("host must not be empty"));
        }
        if self.esl_port == 0 {
            return Err(EslError::invalid_config("esl_port must not be 0"));
        }
        if self
            .gateway
            .trim()
            .is_empty()
        {
            return Err(EslError::invalid_config("gateway must not be empty"));
        }
        if self
            .domain
            .trim()
            .is_empty()
        {
            return Err(EslError::invalid_config("domain must not be empty"));
        }
        if self.event_queue_size == 0 {
            return Err(EslError::invalid_config("event_queue_size must be at least 1"));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Per-connection options derived from these settings.
    pub fn connect_options(&self) -> EslConnectOptions {
        EslConnectOptions {
            event_queue_size: self.event_queue_size,
            command_timeout: self
                .command_timeout_ms
                .map(Duration::from_millis),
            ..Default::default()
        }
    }

    /// Default outbound caller ID, if one is configured.
    pub fn default_caller_id(&self) -> Option<&str> {
        Some(
            self.caller_id_number
                .as_str(),
        )
        .filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_stock_switch() {
        let config = SwitchConfig::from_env_map(&HashMap::new()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.esl_port, 8021);
        assert_eq!(config.esl_password, "ClueCon");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.command_timeout_ms, None);
        assert_eq!(config.default_caller_id(), None);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = SwitchConfig::from_env_map(&env(&[
            ("FS_HOST", "10.0.0.5"),
            ("FS_ESL_PORT", "8022"),
            ("FS_ESL_PASSWORD", "hunter2"),
            ("FS_GATEWAY", "telnyx"),
            ("FS_CALLER_ID", "+14155550000"),
            ("FS_COMMAND_TIMEOUT_MS", "1500"),
            ("FS_EVENT_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.esl_port, 8022);
        assert_eq!(config.gateway, "telnyx");
        assert_eq!(config.default_caller_id(), Some("+14155550000"));
        assert_eq!(config.event_format, EventFormat::Json);
        assert_eq!(
            config
                .connect_options()
                .command_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn blank_values_keep_defaults() {
        let config = SwitchConfig::from_env_map(&env(&[("FS_HOST", "  "), ("FS_ESL_PORT", "")]))
            .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.esl_port, 8021);
    }

    #[test]
    fn invalid_port_rejected() {
        let err = SwitchConfig::from_env_map(&env(&[("FS_ESL_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, EslError::InvalidConfig { .. }));
        assert!(err
            .to_string()
            .contains("FS_ESL_PORT"));

        let err = SwitchConfig::from_env_map(&env(&[("FS_ESL_PORT", "0")])).unwrap_err();
        assert!(matches!(err, EslError::InvalidConfig { .. }));
    }

    #[test]
    fn debug_redacts_password() {
        let config = SwitchConfig {
            esl_password: "s3cret".into(),
            ..Default::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: SwitchConfig =
            serde_json::from_str(r#"{"host":"fs.internal","event_format":"json"}"#).unwrap();
        assert_eq!(config.host, "fs.internal");
        assert_eq!(config.esl_port, 8021);
        assert_eq!(config.event_format, EventFormat::Json);
    }
}
