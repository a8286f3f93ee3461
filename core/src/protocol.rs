//! Wire-level records shared by the debugger event channel and the checker.
//!
//! These are explicit tagged structs rather than free-form maps; the wire
//! schema is still JSON.

use serde::Deserialize;
use serde::Serialize;

/// Status string returned for unknown or already-stopped session tokens.
pub const INVALID_AUTHORIZATION_STATUS: &str =
    "invalid authorization (or process might have been stopped)";

pub const STATUS_OK: &str = "ok";

/// One variable as reported by the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// `false` when extraction failed; the string fields are then empty.
    pub supported: bool,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
    /// `[1]` for scalars, `[N1, N2, …]` for fixed-dimension arrays.
    pub dimensions: Vec<u32>,
}

impl Variable {
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            name: String::new(),
            ty: String::new(),
            value: String::new(),
            dimensions: vec![1],
        }
    }
}

/// Structured view of the debugged program after a step-class command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub is_running: bool,
    pub timeout: bool,
    pub runtime_error: bool,
    pub runtime_error_details: String,
    pub function: String,
    pub function_return_type: String,
    /// 1-based source line, 0 when unknown.
    pub line: u32,
    pub global_variables: Vec<Variable>,
    pub local_variables: Vec<Variable>,
    pub arguments: Vec<Variable>,
    /// Program output captured since the previous snapshot.
    pub stdout: String,
    /// Advisory text for states that keep the session alive (for example
    /// "the program is not being run").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            is_running: true,
            timeout: false,
            runtime_error: false,
            runtime_error_details: String::new(),
            function: String::new(),
            function_return_type: String::new(),
            line: 0,
            global_variables: Vec::new(),
            local_variables: Vec::new(),
            arguments: Vec::new(),
            stdout: String::new(),
            message: None,
        }
    }
}

impl Snapshot {
    /// Snapshot for a program that exited normally.
    pub fn exited() -> Self {
        Self {
            is_running: false,
            ..Self::default()
        }
    }

    /// Snapshot for a program killed by a signal.
    pub fn runtime_error(details: impl Into<String>) -> Self {
        Self {
            is_running: false,
            runtime_error: true,
            runtime_error_details: details.into(),
            ..Self::default()
        }
    }

    /// Snapshot for a debugger that stopped answering.
    pub fn timed_out() -> Self {
        Self {
            is_running: false,
            timeout: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn variable_serializes_type_under_its_wire_name() {
        let var = Variable {
            supported: true,
            name: "a".to_string(),
            ty: "int".to_string(),
            value: "1".to_string(),
            dimensions: vec![1],
        };
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "supported": true,
                "name": "a",
                "type": "int",
                "value": "1",
                "dimensions": [1],
            })
        );
    }

    #[test]
    fn snapshot_omits_absent_advisory_message() {
        let json = serde_json::to_value(Snapshot::exited()).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["is_running"], serde_json::json!(false));
        assert_eq!(json["stdout"], serde_json::json!(""));
    }

    #[test]
    fn timeout_snapshot_flags() {
        let snapshot = Snapshot::timed_out();
        assert!(!snapshot.is_running);
        assert!(snapshot.timeout);
        assert!(!snapshot.runtime_error);
    }
}
