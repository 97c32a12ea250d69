//! `originate` dial strings
//!
//! ```
//! use freeswitch_call_control::commands::{bridge_to_user, DialParams};
//! use freeswitch_call_control::SwitchConfig;
//!
//! let config = SwitchConfig {
//!     gateway: "telnyx".into(),
//!     domain: "pbx.local".into(),
//!     ..Default::default()
//! };
//! let params = DialParams::new("14155550100").agent("1001");
//! let cmd = bridge_to_user(&config, &params).unwrap();
//! assert_eq!(
//!     cmd.to_string(),
//!     "originate {origination_timeout=60,call_direction=outbound}\
//!      sofia/gateway/telnyx/14155550100 &bridge(user/1001@pbx.local)"
//! );
//! ```

use super::{validate_token, ApiCommand};
use crate::{
    config::SwitchConfig,
    constants::{
        DEFAULT_ORIGINATE_TIMEOUT_SECS, DEFAULT_OUTBOUND_CALLER_ID_NAME, MAX_PHONE_DIGITS,
        MIN_PHONE_DIGITS,
    },
    error::{EslError, EslResult},
    headers::ChannelVariable,
};
use std::fmt;

/// Channel variables applied to a leg, rendered as `{k=v,k2=v2}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(Vec<(String, String)>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing an earlier value for the same key in place.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        let key = key.as_ref();
        let value = value.into();
        match self
            .0
            .iter_mut()
            .find(|(k, _)| k == key)
        {
            Some(slot) => slot.1 = value,
            None => self
                .0
                .push((key.to_string(), value)),
        }
        self
    }

    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.0
            .is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn escape_value(value: &str) -> String {
    let escaped = value
        .replace('\'', "\\'")
        .replace(',', "\\,");
    if escaped.contains(' ') {
        format!("'{}'", escaped)
    } else {
        escaped
    }
}

impl fmt::Display for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (key, value)) in self
            .0
            .iter()
            .enumerate()
        {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, escape_value(value))?;
        }
        f.write_str("}")
    }
}

/// Where the originated leg is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A PSTN number through a Sofia gateway.
    Gateway {
        gateway: String,
        destination: String,
        variables: Variables,
    },
    /// A user registered in the switch's directory.
    User {
        user: String,
        domain: String,
        variables: Variables,
    },
}

impl Endpoint {
    pub fn variables(&self) -> &Variables {
        match self {
            Endpoint::Gateway { variables, .. } | Endpoint::User { variables, .. } => variables,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Gateway {
                gateway,
                destination,
                variables,
            } => write!(f, "{}sofia/gateway/{}/{}", variables, gateway, destination),
            Endpoint::User {
                user,
                domain,
                variables,
            } => write!(f, "{}user/{}@{}", variables, user, domain),
        }
    }
}

/// Dialplan application run on the answered leg, rendered `&name(args)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    pub args: Option<String>,
}

impl Application {
    pub fn new(name: impl Into<String>, args: Option<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            args: args.map(Into::into),
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "&{}({})",
            self.name,
            self.args
                .as_deref()
                .unwrap_or("")
        )
    }
}

/// `originate <endpoint> <application>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Originate {
    pub endpoint: Endpoint,
    pub application: Application,
}

impl fmt::Display for Originate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "originate {} {}", self.endpoint, self.application)
    }
}

impl ApiCommand for Originate {
    fn validate(&self) -> EslResult<()> {
        match &self.endpoint {
            Endpoint::Gateway {
                gateway,
                destination,
                ..
            } => {
                validate_token(gateway, "gateway")?;
                validate_token(destination, "destination")?;
            }
            Endpoint::User { user, domain, .. } => {
                validate_token(user, "user")?;
                validate_token(domain, "domain")?;
            }
        }
        validate_token(&self.application.name, "application")
    }
}

/// A dialable number: digits with an optional leading `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Keep the digits and a leading `+`, dropping every other character
    /// (`+1 (415) 555/0100` becomes `+14155550100`). Fails unless 10 to 15
    /// digits remain.
    pub fn parse(raw: &str) -> EslResult<Self> {
        let trimmed = raw.trim();
        let plus = if trimmed.starts_with('+') { "+" } else { "" };
        let digits: String = trimmed
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if digits.len() < MIN_PHONE_DIGITS || digits.len() > MAX_PHONE_DIGITS {
            return Err(EslError::InvalidNumber {
                value: raw.to_string(),
            });
        }
        Ok(Self(format!("{}{}", plus, digits)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = EslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Inputs for an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialParams {
    pub destination: String,
    /// Caller ID presented to the far end; the configured default otherwise.
    pub from_number: Option<String>,
    /// Local extension to bridge; the configured default otherwise.
    pub agent_extension: Option<String>,
    pub caller_id_name: Option<String>,
    pub timeout_secs: u32,
}

impl DialParams {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            from_number: None,
            agent_extension: None,
            caller_id_name: None,
            timeout_secs: DEFAULT_ORIGINATE_TIMEOUT_SECS,
        }
    }

    pub fn from_number(mut self, number: impl Into<String>) -> Self {
        self.from_number = Some(number.into());
        self
    }

    pub fn agent(mut self, extension: impl Into<String>) -> Self {
        self.agent_extension = Some(extension.into());
        self
    }

    pub fn caller_id_name(mut self, name: impl Into<String>) -> Self {
        self.caller_id_name = Some(name.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn caller_id<'a>(&'a self, config: &'a SwitchConfig) -> Option<&'a str> {
        self.from_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| config.default_caller_id())
    }

    fn agent_or_default<'a>(&'a self, config: &'a SwitchConfig) -> EslResult<&'a str> {
        let agent = self
            .agent_extension
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(&config.default_agent_extension);
        validate_token(agent, "agent extension")?;
        Ok(agent)
    }
}

fn outbound_variables(caller_id: Option<&str>, timeout_secs: u32) -> Variables {
    let mut vars = Variables::new();
    if let Some(cid) = caller_id {
        vars.insert(ChannelVariable::OriginationCallerIdNumber, cid);
    }
    vars.insert(ChannelVariable::OriginationTimeout, timeout_secs.to_string());
    vars.insert(ChannelVariable::CallDirection, "outbound");
    vars
}

fn gateway_leg(config: &SwitchConfig, destination: &PhoneNumber, variables: Variables) -> Endpoint {
    Endpoint::Gateway {
        gateway: config
            .gateway
            .clone(),
        destination: destination.to_string(),
        variables,
    }
}

/// Call a number and echo its audio back.
pub fn echo_test(config: &SwitchConfig, destination: &str) -> EslResult<Originate> {
    let destination = PhoneNumber::parse(destination)?;
    let mut vars = Variables::new();
    if let Some(cid) = config.default_caller_id() {
        vars.insert(ChannelVariable::OriginationCallerIdNumber, cid);
    }
    vars.insert(ChannelVariable::CallDirection, "outbound");
    vars.insert(ChannelVariable::TestCall, "true");

    Ok(Originate {
        endpoint: gateway_leg(config, &destination, vars),
        application: Application::new("echo", None::<&str>),
    })
}

/// Call a number and park it once answered.
pub fn park(config: &SwitchConfig, params: &DialParams) -> EslResult<Originate> {
    let destination = PhoneNumber::parse(&params.destination)?;
    let vars = outbound_variables(params.caller_id(config), params.timeout_secs);

    Ok(Originate {
        endpoint: gateway_leg(config, &destination, vars),
        application: Application::new("park", None::<&str>),
    })
}

/// Call a number and bridge it to a local extension once answered.
pub fn bridge_to_user(config: &SwitchConfig, params: &DialParams) -> EslResult<Originate> {
    let destination = PhoneNumber::parse(&params.destination)?;
    let agent = params.agent_or_default(config)?;
    let vars = outbound_variables(params.caller_id(config), params.timeout_secs);

    Ok(Originate {
        endpoint: gateway_leg(config, &destination, vars),
        application: Application::new("bridge", Some(format!("user/{}@{}", agent, config.domain))),
    })
}

/// Ring the agent first; when they answer, dial the customer through the gateway.
///
/// The agent's phone shows the customer number as caller ID. The customer
/// sees `from_number`, or the configured default.
pub fn click_to_call(config: &SwitchConfig, params: &DialParams) -> EslResult<Originate> {
    let destination = PhoneNumber::parse(&params.destination)?;
    let agent = params.agent_or_default(config)?;

    let caller_id_name = params
        .caller_id_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(DEFAULT_OUTBOUND_CALLER_ID_NAME);
    let agent_vars = Variables::new()
        .with(ChannelVariable::OriginationCallerIdName, caller_id_name)
        .with(ChannelVariable::OriginationCallerIdNumber, destination.as_str())
        .with(ChannelVariable::OriginationTimeout, params.timeout_secs.to_string())
        .with(ChannelVariable::CallDirection, "outbound");

    let mut customer_vars = Variables::new();
    if let Some(cid) = params.caller_id(config) {
        customer_vars.insert(ChannelVariable::OriginationCallerIdNumber, cid);
        customer_vars.insert(ChannelVariable::EffectiveCallerIdNumber, cid);
    }
    let customer_leg = gateway_leg(config, &destination, customer_vars);

    Ok(Originate {
        endpoint: Endpoint::User {
            user: agent.to_string(),
            domain: config
                .domain
                .clone(),
            variables: agent_vars,
        },
        application: Application::new("bridge", Some(customer_leg.to_string())),
    })
}
