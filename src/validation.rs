//! Argument validation for `send_mail`
//!
//! Every violated rule is collected so the caller can fix all of them in one
//! round trip.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::models::SendMailInput;
use crate::transport::{OutgoingAttachment, OutgoingMessage};

/// One violated rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    /// JSON type of the received value, `missing` when absent
    pub received_type: String,
    /// Compact JSON of the received value, empty when absent
    pub received_value: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>, received: Option<&Value>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            received_type: type_name(received).to_owned(),
            received_value: received.map(Value::to_string).unwrap_or_default(),
        }
    }
}

/// Validate `send_mail` arguments into a message ready for submission
///
/// # Errors
///
/// Returns every rule the input violates.
pub fn validate_send(input: &SendMailInput) -> Result<OutgoingMessage, Vec<FieldError>> {
    let mut errors = Vec::new();

    let to = validate_recipient(input.to.as_ref(), &mut errors);
    let subject = required_string("subject", input.subject.as_ref(), &mut errors);
    let text = optional_string("text", input.text.as_ref(), &mut errors);
    let html = optional_string("html", input.html.as_ref(), &mut errors);

    let text_ok = input.text.as_ref().is_none_or(|v| v.is_string() || v.is_null());
    let html_ok = input.html.as_ref().is_none_or(|v| v.is_string() || v.is_null());
    if text.is_none() && html.is_none() && text_ok && html_ok {
        errors.push(FieldError::new(
            "text",
            "either text or html body is required",
            input.text.as_ref(),
        ));
    }

    let attachments = validate_attachments(input.attachments.as_ref(), &mut errors);

    match (to, subject) {
        (Some(to), Some(subject)) if errors.is_empty() => Ok(OutgoingMessage {
            to,
            subject,
            text,
            html,
            attachments,
        }),
        _ => Err(errors),
    }
}

/// `to` must be one non-empty address; array forms are refused
fn validate_recipient(value: Option<&Value>, errors: &mut Vec<FieldError>) -> Option<String> {
    let message = match value {
        None | Some(Value::Null) => "recipient is required",
        Some(Value::Array(_)) => {
            "multiple recipients are not supported; send one message per recipient"
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                "recipient must be a non-empty string"
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                "recipient looks like a serialized array; multiple recipients are not supported"
            } else {
                return Some(trimmed.to_owned());
            }
        }
        Some(_) => "recipient must be a string",
    };
    errors.push(FieldError::new("to", message, value));
    None
}

fn required_string(
    field: &str,
    value: Option<&Value>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let message = match value {
        None | Some(Value::Null) => format!("{field} is required"),
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
        Some(Value::String(_)) => format!("{field} must be a non-empty string"),
        Some(_) => format!("{field} must be a string"),
    };
    errors.push(FieldError::new(field, message, value));
    None
}

/// Optional body; blank strings count as absent
fn optional_string(
    field: &str,
    value: Option<&Value>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => (!s.trim().is_empty()).then(|| s.clone()),
        Some(other) => {
            errors.push(FieldError::new(
                field,
                format!("{field} must be a string"),
                Some(other),
            ));
            None
        }
    }
}

/// `attachments` must be an array of attachment objects when present
fn validate_attachments(
    value: Option<&Value>,
    errors: &mut Vec<FieldError>,
) -> Vec<OutgoingAttachment> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| validate_attachment(idx, item, errors))
            .collect(),
        Some(other) => {
            errors.push(FieldError::new(
                "attachments",
                "attachments must be an array of objects",
                Some(other),
            ));
            Vec::new()
        }
    }
}

fn validate_attachment(
    idx: usize,
    item: &Value,
    errors: &mut Vec<FieldError>,
) -> Option<OutgoingAttachment> {
    let Value::Object(fields) = item else {
        errors.push(FieldError::new(
            format!("attachments[{idx}]"),
            "attachment must be an object with filename and content",
            Some(item),
        ));
        return None;
    };
    let field = |name: &str| format!("attachments[{idx}].{name}");

    let filename = required_string(&field("filename"), fields.get("filename"), errors);
    let content = match fields.get("content") {
        Some(Value::String(s)) => Some(s.as_str()),
        other => {
            let message = if other.is_none_or(Value::is_null) {
                "content is required"
            } else {
                "content must be a string"
            };
            errors.push(FieldError::new(field("content"), message, other));
            None
        }
    };
    let content_type =
        optional_string(&field("content_type"), fields.get("content_type"), errors);
    let encoding = match fields.get("encoding") {
        None | Some(Value::Null) => None,
        Some(Value::String(enc)) => Some(enc.trim().to_ascii_lowercase()),
        Some(other) => {
            errors.push(FieldError::new(
                field("encoding"),
                "encoding must be a string",
                Some(other),
            ));
            return None;
        }
    };

    let bytes = match encoding.as_deref() {
        None | Some("" | "utf8" | "utf-8" | "text") => content.map(|c| c.as_bytes().to_vec()),
        Some("base64") => match content.map(|c| (c, STANDARD.decode(c.trim()))) {
            Some((_, Ok(bytes))) => Some(bytes),
            Some((raw, Err(e))) => {
                errors.push(FieldError::new(
                    field("content"),
                    format!("content is not valid base64: {e}"),
                    Some(&Value::String(preview(raw))),
                ));
                None
            }
            None => None,
        },
        Some(_) => {
            errors.push(FieldError::new(
                field("encoding"),
                "encoding must be base64 or utf8",
                fields.get("encoding"),
            ));
            None
        }
    };

    Some(OutgoingAttachment {
        filename: filename?,
        content: bytes?,
        content_type,
    })
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

/// Shorten large payloads echoed back in errors
fn preview(content: &str) -> String {
    const MAX: usize = 64;
    match content.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_owned(),
    }
}
