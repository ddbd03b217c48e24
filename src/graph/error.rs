//! Graph error payloads
//!
//! Failed Graph calls answer with `{"error": {"code": "...", "message": "..."}}`.
//! Only the code matters for classification; the serialized `error` object is
//! kept as the payload for everything we don't recognise.

use serde_json::Value;

/// Error codes the relay distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The application may not send as this mailbox
    AccessDenied,
    /// The message body is not valid base64 or not valid MIME
    InvalidMimeContent,
    /// The message is larger than the mailbox accepts
    MessageSizeExceeded,
    Other(String),
}

impl ErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "ErrorAccessDenied" => ErrorCode::AccessDenied,
            "ErrorMimeContentInvalidBase64String" | "ErrorMimeContentInvalid" => {
                ErrorCode::InvalidMimeContent
            }
            "ErrorMessageSizeExceeded" => ErrorCode::MessageSizeExceeded,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

/// A structured Graph error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphError {
    pub code: ErrorCode,
    pub message: Option<String>,
    /// The `error` object as received, serialized
    pub payload: String,
}

impl GraphError {
    /// Parse a response body; `None` when it is not a Graph error payload
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let error = value.get("error")?;
        let code = error.get("code")?.as_str()?;

        Some(Self {
            code: ErrorCode::from_code(code),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            payload: error.to_string(),
        })
    }
}
