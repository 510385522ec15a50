use crate::error::{AppError, FieldError};
use crate::supervisor::models::TerminalDraft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire names of every command the UI may send.
pub const COMMANDS: &[&str] = &[
    "get_terminals",
    "add_terminal",
    "update_terminal",
    "delete_terminal",
    "start_process",
    "stop_process",
    "get_logs",
    "get_process_status",
];

/// One line of input: `{"id": ..., "command": "...", "args": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddTerminalParams {
    pub data: TerminalDraft,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTerminalParams {
    pub id: String,
    pub data: TerminalDraft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<WireFieldError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFieldError {
    pub field: String,
    pub message: String,
}

impl From<&FieldError> for WireFieldError {
    fn from(err: &FieldError) -> Self {
        Self {
            field: err.field.clone(),
            message: err.message.clone(),
        }
    }
}

impl ErrorBody {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            fields: Vec::new(),
        }
    }
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            fields: err.field_errors().iter().map(WireFieldError::from).collect(),
        }
    }
}

/// One line of output, correlated to its request by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_defaults_missing_id_and_args() {
        let request: Request = serde_json::from_str(r#"{"command":"get_terminals"}"#).unwrap();
        assert_eq!(request.id, Value::Null);
        assert!(request.args.is_empty());
    }

    #[test]
    fn failure_serializes_without_result() {
        let mut errors = crate::error::ValidationErrors::default();
        errors.push("path", "Invalid path: directory does not exist");
        let err = AppError::Validation(errors);

        let response = Response::failure(json!(7), ErrorBody::from(&err));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["ok"], json!(false));
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["kind"], json!("ValidationError"));
        assert_eq!(value["error"]["fields"][0]["field"], json!("path"));
    }
}
