//! Domain objects and tool input DTOs
//!
//! Domain types are built per call from server responses. Input types carry
//! `JsonSchema` so the tool catalog can advertise their shape.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::search::{DEFAULT_MAILBOX, SearchCriteria};

/// Header-level view of a message
#[derive(Debug, Clone, PartialEq)]
pub struct EmailSummary {
    /// Folder-scoped UID
    pub uid: u32,
    /// Subject, `(No Subject)` when absent
    pub subject: String,
    pub from: String,
    pub to: String,
    /// Parsed Date header, or the fetch time when missing or unparseable
    pub date: DateTime<Utc>,
    /// Flags in server order
    pub flags: Vec<String>,
    /// Derived from the MIME structure
    pub has_attachments: bool,
    /// `RFC822.SIZE` in bytes
    pub size: u32,
}

/// Attachment metadata; content is never downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    /// Filename, `unnamed` when the part carries none
    pub filename: String,
    /// MIME type, `application/octet-stream` when unknown
    pub content_type: String,
    /// Decoded size in bytes
    pub size: usize,
    pub content_id: Option<String>,
}

/// Full message content
#[derive(Debug, Clone, PartialEq)]
pub struct EmailDetails {
    pub summary: EmailSummary,
    /// Plain text body (derived from HTML when no text part exists)
    pub text: Option<String>,
    /// Sanitized HTML body
    pub html: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
    /// Header name to all of its values joined with `", "`, in first-seen order
    pub headers: Vec<(String, String)>,
}

/// Result of an SMTP submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    /// `Message-ID` of the sent message
    pub message_id: Option<String>,
    /// Transport or build error text
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Input: a single mailbox name
///
/// Used by `create_mailbox` and `delete_mailbox`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MailboxNameInput {
    /// Full mailbox name, including hierarchy (e.g., `Archive/2025`)
    pub name: String,
}

/// Input: search messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Mailbox to search (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Sender contains this text
    pub from: Option<String>,
    /// Recipient contains this text
    pub to: Option<String>,
    /// Subject contains this text
    pub subject: Option<String>,
    /// Body contains this text
    pub body: Option<String>,
    /// Only unread messages
    #[serde(default)]
    pub unread_only: bool,
    /// Only messages from the last N days
    pub since_days: Option<u32>,
    /// Only messages older than N days
    pub before_days: Option<u32>,
    /// Maximum results to show (default 50)
    pub limit: Option<usize>,
}

impl SearchEmailsInput {
    /// Convert tool arguments into session search criteria
    pub fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            mailbox: Some(self.mailbox.clone()),
            from: non_blank(&self.from),
            to: non_blank(&self.to),
            subject: non_blank(&self.subject),
            body: non_blank(&self.body),
            unread_only: self.unread_only,
            since_days: self.since_days,
            before_days: self.before_days,
            limit: self.limit,
        }
    }
}

/// Input: get one message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    /// Mailbox containing the message (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Message UID
    pub uid: u32,
}

/// Input: page through a whole mailbox
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListAllEmailsInput {
    /// Mailbox to list (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// 1-based page number (default 1)
    pub page: Option<usize>,
    /// Messages per page (default 20, max 100)
    pub page_size: Option<usize>,
}

/// Input: move messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveEmailsInput {
    /// Source mailbox (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// UIDs to move
    pub uids: Vec<u32>,
    /// Destination mailbox
    pub destination: String,
}

/// Input: delete messages
///
/// Deletion only happens when `preview` is exactly `false`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteEmailsInput {
    /// Mailbox containing the messages (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// UIDs to delete
    pub uids: Vec<u32>,
    /// Preview only (default). Pass `false` to permanently delete.
    pub preview: Option<Value>,
}

impl DeleteEmailsInput {
    /// Whether the caller explicitly disabled preview mode
    pub fn confirmed(&self) -> bool {
        matches!(self.preview, Some(Value::Bool(false)))
    }
}

/// Input: mark messages read or unread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MarkSeenInput {
    /// Mailbox containing the messages (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// UIDs to update
    pub uids: Vec<u32>,
    /// `true` marks read, `false` marks unread (default true)
    #[serde(default = "default_true")]
    pub seen: bool,
}

/// Input: add or remove flags
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FlagsInput {
    /// Mailbox containing the messages (defaults to `INBOX`)
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// UIDs to update
    pub uids: Vec<u32>,
    /// Flag names (e.g., `\Flagged`, `Important`)
    pub flags: Vec<String>,
}

/// Input: send one message
///
/// Fields are loosely typed so that every problem can be reported at once.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SendMailInput {
    /// Single recipient address (string). Multiple recipients are rejected.
    pub to: Option<Value>,
    /// Subject line (string)
    pub subject: Option<Value>,
    /// Plain text body (string)
    pub text: Option<Value>,
    /// HTML body (string)
    pub html: Option<Value>,
    /// Files to attach: objects with `filename`, `content`, optional
    /// `content_type` (defaults to `application/octet-stream`) and optional
    /// `encoding` (`base64` or `utf8`)
    pub attachments: Option<Value>,
}

/// Default value for `mailbox` fields
pub fn default_mailbox() -> String {
    DEFAULT_MAILBOX.to_owned()
}

/// Default value for `bool` fields (true)
fn default_true() -> bool {
    true
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .cloned()
}
