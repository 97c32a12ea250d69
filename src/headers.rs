//! Typed names for event headers and channel variables.

/// Error returned when parsing an unrecognized event header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventHeaderError(pub String);

impl std::fmt::Display for ParseEventHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event header: {}", self.0)
    }
}

impl std::error::Error for ParseEventHeaderError {}

define_header_enum! {
    error_type: ParseEventHeaderError,
    /// Headers carried on call events (not framing headers like `Content-Type`).
    ///
    /// Pass to [`CallEvent::header()`](crate::CallEvent::header) for typed lookups.
    pub enum EventHeader {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        UniqueId => "Unique-ID",
        CallerUniqueId => "Caller-Unique-ID",
        OtherLegUniqueId => "Other-Leg-Unique-ID",
        JobUuid => "Job-UUID",
        ChannelName => "Channel-Name",
        ChannelCallState => "Channel-Call-State",
        AnswerState => "Answer-State",
        CallDirection => "Call-Direction",
        HangupCause => "Hangup-Cause",
        CallerCallerIdName => "Caller-Caller-ID-Name",
        CallerCallerIdNumber => "Caller-Caller-ID-Number",
        CallerDestinationNumber => "Caller-Destination-Number",
        CoreUuid => "Core-UUID",
        EventDateTimestamp => "Event-Date-Timestamp",
    }
}

/// Error returned when parsing an unrecognized channel variable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelVariableError(pub String);

impl std::fmt::Display for ParseChannelVariableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown channel variable: {}", self.0)
    }
}

impl std::error::Error for ParseChannelVariableError {}

define_header_enum! {
    error_type: ParseChannelVariableError,
    /// Channel variables read from events (`variable_<name>`) or set in an
    /// originate `{...}` block.
    pub enum ChannelVariable {
        Direction => "direction",
        CallDirection => "call_direction",
        StartStamp => "start_stamp",
        AnswerStamp => "answer_stamp",
        EndStamp => "end_stamp",
        Duration => "duration",
        Billsec => "billsec",
        HangupCause => "hangup_cause",
        OriginationCallerIdName => "origination_caller_id_name",
        OriginationCallerIdNumber => "origination_caller_id_number",
        OriginationTimeout => "origination_timeout",
        EffectiveCallerIdNumber => "effective_caller_id_number",
        TestCall => "test_call",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_wire_name() {
        assert_eq!(EventHeader::UniqueId.to_string(), "Unique-ID");
        assert_eq!(
            EventHeader::CallerDestinationNumber.to_string(),
            "Caller-Destination-Number"
        );
        assert_eq!(ChannelVariable::Billsec.to_string(), "billsec");
    }

    #[test]
    fn from_str_case_insensitive() {
        assert_eq!(
            "unique-id".parse::<EventHeader>(),
            Ok(EventHeader::UniqueId)
        );
        assert_eq!(
            "HANGUP-CAUSE".parse::<EventHeader>(),
            Ok(EventHeader::HangupCause)
        );
        assert_eq!(
            "Start_Stamp".parse::<ChannelVariable>(),
            Ok(ChannelVariable::StartStamp)
        );
    }

    #[test]
    fn from_str_unknown() {
        let err = "X-Not-Known"
            .parse::<EventHeader>()
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown event header: X-Not-Known");
    }

    #[test]
    fn every_variant_parses_back() {
        for v in EventHeader::VARIANTS {
            assert_eq!(
                v.as_str()
                    .parse::<EventHeader>(),
                Ok(*v)
            );
        }
        for v in ChannelVariable::VARIANTS {
            assert_eq!(
                v.as_str()
                    .parse::<ChannelVariable>(),
                Ok(*v)
            );
        }
    }
}
