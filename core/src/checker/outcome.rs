use serde::Deserialize;
use serde::Serialize;

/// Result of checking one submission against its test pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// 0..100.
    pub percentage: f64,
    /// The input of the first test that broke a comparison or a limit.
    pub first_failed: String,
    pub time_limit_exceeded: bool,
    pub memory_limit_exceeded: bool,
    pub compilation_error: bool,
    pub invalid_problem_id: bool,
    pub unauthorized: bool,
}

impl Default for CheckOutcome {
    fn default() -> Self {
        Self {
            percentage: 0.0,
            first_failed: String::new(),
            time_limit_exceeded: false,
            memory_limit_exceeded: false,
            compilation_error: false,
            invalid_problem_id: false,
            unauthorized: false,
        }
    }
}

impl CheckOutcome {
    /// Outcome returned for a token the result registry does not know.
    pub fn unauthorized() -> Self {
        Self {
            unauthorized: true,
            ..Self::default()
        }
    }

    pub fn compilation_error() -> Self {
        Self {
            compilation_error: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_shape_lists_every_flag() {
        let json = serde_json::to_value(CheckOutcome::unauthorized()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "percentage": 0.0,
                "first_failed": "",
                "time_limit_exceeded": false,
                "memory_limit_exceeded": false,
                "compilation_error": false,
                "invalid_problem_id": false,
                "unauthorized": true,
            })
        );
    }
}
