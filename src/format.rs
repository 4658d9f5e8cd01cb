//! Text rendering of tool results
//!
//! Every tool answers with a single text block. These helpers keep the
//! wording consistent across tools.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::models::{EmailDetails, EmailSummary};
use crate::pagination::Page;
use crate::validation::FieldError;

/// Text reply for one tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReply {
    pub text: String,
    /// Rendered as an MCP tool error when set
    pub is_error: bool,
}

impl ToolReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// `Failed to <action>: <error>`
pub fn failure(action: &str, err: &AppError) -> String {
    format!("Failed to {action}: {err}")
}

pub fn mailboxes(names: &[String]) -> String {
    if names.is_empty() {
        return "No mailboxes found.".to_owned();
    }
    let mut out = format!("Found {} mailbox(es):\n", names.len());
    for name in names {
        let _ = writeln!(out, "- {name}");
    }
    out
}

/// Search result listing; `shown` may be a prefix of all matches
pub fn search_results(mailbox: &str, shown: &[EmailSummary], total: usize) -> String {
    if total == 0 {
        return format!("No emails found in {mailbox}.");
    }
    let mut out = if shown.len() < total {
        format!(
            "Found {total} email(s) in {mailbox}, showing the newest {}:\n\n",
            shown.len()
        )
    } else {
        format!("Found {total} email(s) in {mailbox}:\n\n")
    };
    push_summaries(&mut out, shown);
    out
}

pub fn page(mailbox: &str, page: &Page<EmailSummary>) -> String {
    let mut out = format!(
        "Page {} of {} ({} email(s) in {mailbox}, {} per page):\n\n",
        page.page, page.total_pages, page.total_items, page.page_size
    );
    if page.items.is_empty() {
        out.push_str("No emails on this page.\n");
    } else {
        push_summaries(&mut out, &page.items);
    }
    out
}

fn push_summaries(out: &mut String, summaries: &[EmailSummary]) {
    for summary in summaries {
        let _ = writeln!(out, "{}", summary_line(summary));
    }
}

/// One-line summary: `[UID 4] 2025-01-03 10:00 UTC | From: .. | Subject: ..`
pub fn summary_line(summary: &EmailSummary) -> String {
    let mut line = format!(
        "[UID {}] {} | From: {} | Subject: {}",
        summary.uid,
        timestamp(&summary.date),
        or_unknown(&summary.from),
        summary.subject
    );
    if !summary.flags.is_empty() {
        let _ = write!(line, " | Flags: {}", summary.flags.join(" "));
    }
    if summary.has_attachments {
        line.push_str(" | has attachments");
    }
    line
}

pub fn details(mailbox: &str, details: &EmailDetails) -> String {
    let summary = &details.summary;
    let mut out = String::new();
    let _ = writeln!(out, "Mailbox: {mailbox}");
    let _ = writeln!(out, "UID: {}", summary.uid);
    let _ = writeln!(out, "From: {}", or_unknown(&summary.from));
    let _ = writeln!(out, "To: {}", or_unknown(&summary.to));
    let _ = writeln!(out, "Subject: {}", summary.subject);
    let _ = writeln!(out, "Date: {}", timestamp(&summary.date));
    if !summary.flags.is_empty() {
        let _ = writeln!(out, "Flags: {}", summary.flags.join(" "));
    }
    let _ = writeln!(out, "Size: {} bytes", summary.size);

    out.push_str("\n--- Body ---\n");
    match (&details.text, &details.html) {
        (Some(text), _) => out.push_str(text.trim_end()),
        (None, Some(html)) => out.push_str(html.trim_end()),
        (None, None) => out.push_str("(empty)"),
    }
    out.push('\n');

    if details.html.is_some() && details.text.is_some() {
        out.push_str("\n(An HTML version of this message is also available.)\n");
    }

    if !details.attachments.is_empty() {
        let _ = writeln!(out, "\n--- Attachments ({}) ---", details.attachments.len());
        for att in &details.attachments {
            let _ = write!(out, "- {} ({}, {} bytes)", att.filename, att.content_type, att.size);
            if let Some(cid) = &att.content_id {
                let _ = write!(out, " Content-ID {cid}");
            }
            out.push('\n');
        }
    }

    if !details.headers.is_empty() {
        out.push_str("\n--- Headers ---\n");
        for (name, value) in &details.headers {
            let _ = writeln!(out, "{name}: {value}");
        }
    }
    out
}

pub fn delete_preview(mailbox: &str, uids: &[u32]) -> String {
    format!(
        "Preview: {} email(s) in {mailbox} would be permanently deleted (UIDs: {}). \
         Call delete_emails again with preview set to false to delete them.",
        uids.len(),
        uid_list(uids)
    )
}

pub fn field_errors(errors: &[FieldError]) -> String {
    let mut out = format!(
        "Invalid send_mail arguments ({} problem(s)):\n",
        errors.len()
    );
    for err in errors {
        let _ = write!(out, "- {}: {} (received {}", err.field, err.message, err.received_type);
        if !err.received_value.is_empty() {
            let _ = write!(out, " {}", err.received_value);
        }
        out.push_str(")\n");
    }
    out
}

/// Comma-separated UIDs
pub fn uid_list(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn timestamp(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "(unknown)"
    } else {
        value
    }
}
