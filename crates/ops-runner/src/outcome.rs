use crate::error::OpsError;
use serde_json::{json, Value};

/// One JSON document for stdout plus the process exit code.
#[derive(Debug, Clone, PartialEq)]
pub struct OpOutcome {
    pub payload: Value,
    pub exit_code: i32,
}

impl OpOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            payload,
            exit_code: 0,
        }
    }

    /// Exit 0 when `ok`, 1 otherwise.
    pub fn reported(payload: Value, ok: bool) -> Self {
        Self {
            payload,
            exit_code: if ok { 0 } else { 1 },
        }
    }

    pub fn from_error(err: &OpsError) -> Self {
        Self {
            payload: json!({
                "ok": false,
                "error": err.to_string(),
                "code": err.code(),
            }),
            exit_code: err.exit_code(),
        }
    }

    pub fn ok(&self) -> bool {
        self.payload.get("ok").and_then(Value::as_bool).unwrap_or(false)
    }
}
