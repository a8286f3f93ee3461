//! Named events with JSON payloads, as they ride the `/debugger` WebSocket.
//!
//! One text frame carries one event: `{"event": <name>, "data": <payload>}`.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Incoming frame. `data` defaults to `null` so bare events parse.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Outgoing frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEvent {
    pub event: String,
    pub data: Value,
}

impl OutgoingEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartDebuggingPayload {
    pub code: String,
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedPayload {
    pub authorization: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionPayload {
    pub authorization: String,
    #[serde(default)]
    pub add_breakpoints: Vec<Value>,
    #[serde(default)]
    pub remove_breakpoints: Vec<Value>,
}

/// Breakpoint entries must be integer line numbers; integer-parsable
/// strings are tolerated, anything else rejects the whole request.
pub fn parse_breakpoints(values: &[Value]) -> Option<Vec<u32>> {
    values
        .iter()
        .map(|value| match value {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn frames_parse_with_and_without_data() {
        let frame: EventFrame =
            serde_json::from_str(r#"{"event":"ping","data":{"authorization":"a"}}"#).unwrap();
        assert_eq!(frame.event, "ping");
        let frame: EventFrame = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn motion_payload_defaults_empty_deltas() {
        let payload: MotionPayload =
            serde_json::from_value(json!({"authorization": "tok"})).unwrap();
        assert!(payload.add_breakpoints.is_empty());
        assert!(payload.remove_breakpoints.is_empty());
    }

    #[test]
    fn breakpoints_accept_integers_and_integer_strings() {
        assert_eq!(
            parse_breakpoints(&[json!(3), json!("7"), json!(" 12 ")]),
            Some(vec![3, 7, 12])
        );
    }

    #[test]
    fn breakpoints_reject_everything_else() {
        assert_eq!(parse_breakpoints(&[json!(3.5)]), None);
        assert_eq!(parse_breakpoints(&[json!("seven")]), None);
        assert_eq!(parse_breakpoints(&[json!(-2)]), None);
        assert_eq!(parse_breakpoints(&[json!(null)]), None);
        assert_eq!(parse_breakpoints(&[json!([1])]), None);
    }

    #[test]
    fn outgoing_events_serialize_as_named_frames() {
        let event = OutgoingEvent::new("pong", json!({"status": "ok"}));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "pong", "data": {"status": "ok"}})
        );
    }
}
