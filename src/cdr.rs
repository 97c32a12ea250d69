//! Call-detail records built from `CHANNEL_HANGUP_COMPLETE`

use crate::{
    channel::CallDirection,
    event::CallEvent,
    headers::{ChannelVariable, EventHeader},
};
use serde::{Deserialize, Serialize};

/// Summary of one finished call leg.
///
/// Timestamps are the switch's own `*_stamp` strings, passed through unparsed.
/// `billsec` is normally at most `duration`; the switch is trusted on that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdrRecord {
    pub uuid: String,
    pub caller_id_name: Option<String>,
    pub caller_id_number: Option<String>,
    pub destination_number: Option<String>,
    pub direction: Option<CallDirection>,
    pub start_time: Option<String>,
    pub answer_time: Option<String>,
    pub end_time: Option<String>,
    /// Seconds from channel creation to hangup.
    pub duration: u64,
    /// Seconds from answer to hangup.
    pub billsec: u64,
    pub hangup_cause: Option<String>,
}

fn owned(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn seconds(value: Option<&str>) -> u64 {
    value
        .and_then(|v| {
            v.trim()
                .parse()
                .ok()
        })
        .unwrap_or(0)
}

impl CdrRecord {
    /// Build a record from a hangup-complete event. Events without a
    /// `Unique-ID` yield nothing.
    pub fn from_event(event: &CallEvent) -> Option<Self> {
        let uuid = event
            .header(EventHeader::UniqueId)
            .filter(|u| !u.is_empty())?;

        Some(Self {
            uuid: uuid.to_string(),
            caller_id_name: owned(event.header(EventHeader::CallerCallerIdName)),
            caller_id_number: owned(event.header(EventHeader::CallerCallerIdNumber)),
            destination_number: owned(event.header(EventHeader::CallerDestinationNumber)),
            direction: event.call_direction(),
            start_time: owned(event.variable(ChannelVariable::StartStamp)),
            answer_time: owned(event.variable(ChannelVariable::AnswerStamp)),
            end_time: owned(event.variable(ChannelVariable::EndStamp)),
            duration: seconds(event.variable(ChannelVariable::Duration)),
            billsec: seconds(event.variable(ChannelVariable::Billsec)),
            hangup_cause: owned(event.hangup_cause()),
        })
    }

    /// The far end picked up and talk time was billed.
    pub fn was_answered(&self) -> bool {
        self.billsec > 0 && self.answer_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn hangup_complete() -> CallEvent {
        let mut event = CallEvent::with_kind(EventKind::ChannelHangupComplete);
        event.set_header("Unique-ID", "abc-123");
        event.set_header("Caller-Caller-ID-Name", "Alice");
        event.set_header("Caller-Caller-ID-Number", "+14155550100");
        event.set_header("Caller-Destination-Number", "1001");
        event.set_header("Call-Direction", "inbound");
        event.set_header("variable_start_stamp", "2024-05-01 10:00:00");
        event.set_header("variable_answer_stamp", "2024-05-01 10:00:12");
        event.set_header("variable_end_stamp", "2024-05-01 10:00:42");
        event.set_header("variable_duration", "42");
        event.set_header("variable_billsec", "30");
        event.set_header("Hangup-Cause", "NORMAL_CLEARING");
        event
    }

    #[test]
    fn extracts_all_fields() {
        let cdr = CdrRecord::from_event(&hangup_complete()).unwrap();
        assert_eq!(cdr.uuid, "abc-123");
        assert_eq!(cdr.caller_id_name.as_deref(), Some("Alice"));
        assert_eq!(cdr.caller_id_number.as_deref(), Some("+14155550100"));
        assert_eq!(cdr.destination_number.as_deref(), Some("1001"));
        assert_eq!(cdr.direction, Some(CallDirection::Inbound));
        assert_eq!(cdr.start_time.as_deref(), Some("2024-05-01 10:00:00"));
        assert_eq!(cdr.end_time.as_deref(), Some("2024-05-01 10:00:42"));
        assert_eq!(cdr.duration, 42);
        assert_eq!(cdr.billsec, 30);
        assert_eq!(cdr.hangup_cause.as_deref(), Some("NORMAL_CLEARING"));
        assert!(cdr.was_answered());
    }

    #[test]
    fn missing_unique_id_yields_none() {
        let mut event = CallEvent::with_kind(EventKind::ChannelHangupComplete);
        event.set_header("Hangup-Cause", "NORMAL_CLEARING");
        assert!(CdrRecord::from_event(&event).is_none());
    }

    #[test]
    fn non_numeric_durations_become_zero() {
        let mut event = hangup_complete();
        event.set_header("variable_duration", "n/a");
        event.set_header("variable_billsec", "");
        let cdr = CdrRecord::from_event(&event).unwrap();
        assert_eq!(cdr.duration, 0);
        assert_eq!(cdr.billsec, 0);
        assert!(!cdr.was_answered());
    }

    #[test]
    fn direction_falls_back_to_channel_variable() {
        let mut event = CallEvent::with_kind(EventKind::ChannelHangupComplete);
        event.set_header("Unique-ID", "u-2");
        event.set_header("variable_direction", "outbound");
        let cdr = CdrRecord::from_event(&event).unwrap();
        assert_eq!(cdr.direction, Some(CallDirection::Outbound));
        assert_eq!(cdr.caller_id_name, None);
    }

    #[test]
    fn serializes_with_lowercase_direction() {
        let cdr = CdrRecord::from_event(&hangup_complete()).unwrap();
        let json = serde_json::to_value(&cdr).unwrap();
        assert_eq!(json["direction"], "inbound");
        assert_eq!(json["billsec"], 30);
    }
}
