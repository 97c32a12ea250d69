//! Registration and active-call queries
//!
//! Parsing here is best effort: malformed output degrades to empty or
//! "not registered" results instead of failing the caller.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    commands::validate_token,
    error::{EslError, EslResult},
    session::SwitchSession,
};

/// Registration of one extension as reported by the SIP profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub registered: bool,
    pub contact: Option<String>,
    pub user_agent: Option<String>,
    /// Expiry as printed by the switch, e.g. `2024-05-01 10:30:00`.
    pub expires: Option<String>,
}

impl RegistrationInfo {
    fn unregistered() -> Self {
        Self::default()
    }
}

/// One row of `show calls`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveCallRecord {
    pub uuid: String,
    pub direction: String,
    pub created: String,
    pub name: String,
    pub state: String,
    #[serde(rename = "cid_name")]
    pub caller_id_name: String,
    #[serde(rename = "cid_num")]
    pub caller_id_number: String,
    #[serde(rename = "dest")]
    pub destination_number: String,
    pub application: String,
    pub application_data: String,
}

#[derive(Deserialize)]
struct ShowCallsJson {
    #[serde(default)]
    rows: Vec<ActiveCallRecord>,
}

/// Decode `show calls as json`. A missing `rows` key means no calls.
pub fn parse_active_calls_json(body: &str) -> EslResult<Vec<ActiveCallRecord>> {
    let parsed: ShowCallsJson = serde_json::from_str(body.trim())?;
    Ok(parsed.rows)
}

const MIN_CALL_COLUMNS: usize = 5;

fn is_separator_line(line: &str) -> bool {
    line.chars()
        .all(|c| matches!(c, '-' | '=' | '+' | '|' | ' '))
}

fn is_total_line(line: &str) -> bool {
    line.strip_suffix("total.")
        .map(|count| {
            count
                .trim()
                .chars()
                .all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false)
}

/// Parse the comma-delimited text form of `show calls`.
///
/// Header, separator and `N total.` lines are skipped, as are rows with
/// fewer than five columns.
pub fn parse_active_calls_text(body: &str) -> Vec<ActiveCallRecord> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("uuid,"))
        .filter(|line| !is_separator_line(line))
        .filter(|line| !is_total_line(line))
        .filter_map(|line| {
            let cols: Vec<&str> = line
                .split(',')
                .map(str::trim)
                .collect();
            if cols.len() < MIN_CALL_COLUMNS {
                return None;
            }
            let col = |i: usize| {
                cols.get(i)
                    .copied()
                    .unwrap_or("")
                    .to_string()
            };
            Some(ActiveCallRecord {
                uuid: col(0),
                direction: col(1),
                created: col(2),
                name: col(3),
                state: col(4),
                caller_id_name: col(5),
                caller_id_number: col(6),
                destination_number: col(7),
                application: col(8),
                application_data: col(9),
            })
        })
        .collect()
}

/// `true` if the registration listing mentions `<extension>@`.
pub fn registrations_contain(listing: &str, extension: &str) -> bool {
    listing.contains(&format!("{}@", extension))
}

fn expires_in(text: &str) -> Option<String> {
    let start = text.find("EXP(")? + "EXP(".len();
    let len = text[start..].find(')')?;
    Some(text[start..start + len].to_string())
}

/// `sofia status profile <p> reg` prints one `Key: value` block per
/// registration; find the block whose `User` is this extension.
fn parse_registration_block(listing: &str, extension: &str) -> Option<RegistrationInfo> {
    let user_prefix = format!("{}@", extension);
    listing
        .split("\n\n")
        .find_map(|block| {
            let field = |key: &str| {
                block
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(k, _)| k.trim() == key)
                    .map(|(_, v)| v.trim())
            };
            let user = field("User")?;
            if !user.starts_with(&user_prefix) {
                return None;
            }
            Some(RegistrationInfo {
                registered: true,
                contact: field("Contact").map(str::to_string),
                user_agent: field("Agent").map(str::to_string),
                expires: field("Status").and_then(expires_in),
            })
        })
}

/// Fallback for one-line-per-registration listings.
fn parse_registration_line(listing: &str, extension: &str) -> Option<RegistrationInfo> {
    let needle = format!("{}@", extension);
    let line = listing
        .lines()
        .find(|line| line.contains(&needle))?;
    let mut tokens = line.split_whitespace();
    Some(RegistrationInfo {
        registered: true,
        contact: tokens
            .clone()
            .find(|t| t.contains('@'))
            .map(str::to_string),
        user_agent: tokens
            .find(|t| t.contains('/'))
            .map(str::to_string),
        expires: expires_in(line),
    })
}

/// Extract one extension's registration from a listing.
pub fn parse_registration(listing: &str, extension: &str) -> RegistrationInfo {
    let listing = listing.replace("\r\n", "\n");
    let block_format = listing
        .lines()
        .any(|line| {
            line.trim_start()
                .starts_with("User:")
        });
    let found = if block_format {
        parse_registration_block(&listing, extension)
    } else {
        parse_registration_line(&listing, extension)
    };
    found.unwrap_or_else(RegistrationInfo::unregistered)
}

fn reject_err(body: String) -> EslResult<String> {
    let trimmed = body.trim();
    if trimmed.starts_with("-ERR") {
        return Err(EslError::CommandFailed {
            reply_text: trimmed.to_string(),
        });
    }
    Ok(body)
}

impl SwitchSession {
    /// Raw registration listing of the configured SIP profile.
    pub async fn get_registrations(&self) -> EslResult<String> {
        let profile = &self
            .config()
            .sip_profile;
        validate_token(profile, "sip profile")?;
        self.api(&format!("sofia status profile {} reg", profile))
            .await
    }

    /// Whether the extension is registered. Query failures count as offline.
    pub async fn is_extension_online(&self, extension: &str) -> bool {
        match self
            .get_registrations()
            .await
        {
            Ok(listing) => registrations_contain(&listing, extension),
            Err(e) => {
                debug!("Registration check for {} failed: {}", extension, e);
                false
            }
        }
    }

    /// Registration details for one extension; `registered: false` when it
    /// is absent or the query fails.
    pub async fn get_extension_registration(&self, extension: &str) -> RegistrationInfo {
        match self
            .get_registrations()
            .await
        {
            Ok(listing) => parse_registration(&listing, extension),
            Err(e) => {
                debug!("Registration lookup for {} failed: {}", extension, e);
                RegistrationInfo::unregistered()
            }
        }
    }

    /// Calls currently up on the switch.
    ///
    /// Falls back to the text form when the JSON reply is not decodable,
    /// including a `-ERR` reply. Only the text query's errors are returned.
    pub async fn get_active_calls(&self) -> EslResult<Vec<ActiveCallRecord>> {
        let body = self
            .api("show calls as json")
            .await?;
        match parse_active_calls_json(&body) {
            Ok(calls) => Ok(calls),
            Err(e) => {
                warn!("show calls as json was not decodable ({}), using text output", e);
                let text = reject_err(
                    self.api("show calls")
                        .await?,
                )?;
                Ok(parse_active_calls_text(&text))
            }
        }
    }

    /// Raw `sofia status gateway` output for `gateway`, or the configured one.
    pub async fn get_gateway_status(&self, gateway: Option<&str>) -> EslResult<String> {
        let gateway = gateway.unwrap_or(
            &self
                .config()
                .gateway,
        );
        validate_token(gateway, "gateway")?;
        self.api(&format!("sofia status gateway {}", gateway))
            .await
    }
}
