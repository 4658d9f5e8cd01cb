//! Message parsing and MIME handling
//!
//! Parses RFC822 messages using `mailparse`, extracts body text/HTML,
//! and collects attachment metadata. Sanitizes HTML with `ammonia` and
//! falls back to `html2text` when a message has no plain-text part.

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedMail};

use crate::errors::{AppError, AppResult};
use crate::models::{AttachmentInfo, EmailDetails, EmailSummary};
use crate::transport::{FetchedHeaders, FetchedMessage, MimeNode};

/// Subject used when the header is absent
pub const NO_SUBJECT: &str = "(No Subject)";
/// Filename used when an attachment carries none
pub const UNNAMED_ATTACHMENT: &str = "unnamed";
/// Content type used when an attachment carries none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Wrap width used when deriving text from HTML
const HTML_TEXT_WIDTH: usize = 100;

/// Whether a `BODYSTRUCTURE` tree contains an attachment
///
/// Any leaf that is neither `text/*` nor `multipart/*` counts, as does any
/// part with an explicit `attachment` disposition.
pub fn has_attachments(node: &MimeNode) -> bool {
    if node.disposition.as_deref() == Some("attachment") {
        return true;
    }
    if node.children.is_empty() {
        return !node.mime_type.starts_with("text/") && !node.mime_type.starts_with("multipart/");
    }
    node.children.iter().any(has_attachments)
}

/// Build a summary from a header-only fetch
///
/// # Errors
///
/// - `Parse` if the header block is malformed
pub fn summarize(fetched: &FetchedHeaders, now: DateTime<Utc>) -> AppResult<EmailSummary> {
    let headers = parse_header_bytes(&fetched.header_bytes)?;
    Ok(EmailSummary {
        subject: header_value(&headers, "subject").unwrap_or_else(|| NO_SUBJECT.to_owned()),
        from: header_value(&headers, "from").unwrap_or_default(),
        to: header_value(&headers, "to").unwrap_or_default(),
        date: parse_date(header_value(&headers, "date").as_deref(), now),
        ..fallback_summary(fetched, now)
    })
}

/// Summary built from protocol attributes alone, for unreadable headers
pub fn fallback_summary(fetched: &FetchedHeaders, now: DateTime<Utc>) -> EmailSummary {
    EmailSummary {
        uid: fetched.uid,
        subject: NO_SUBJECT.to_owned(),
        from: String::new(),
        to: String::new(),
        date: now,
        flags: fetched.flags.clone(),
        has_attachments: fetched.structure.as_ref().is_some_and(has_attachments),
        size: fetched.size,
    }
}

/// Parse a full message into details
///
/// # Errors
///
/// - `Parse` if `mailparse` cannot read the message
pub fn parse_message(fetched: &FetchedMessage, now: DateTime<Utc>) -> AppResult<EmailDetails> {
    let parsed = mailparse::parse_mail(&fetched.raw)
        .map_err(|e| AppError::Parse(format!("failed to parse RFC822 message: {e}")))?;

    let headers = to_tuples(&parsed.headers);
    let mut body_text = None;
    let mut body_html = None;
    let mut attachments = Vec::new();
    walk_parts(&parsed, &mut body_text, &mut body_html, &mut attachments)?;

    if body_text.is_none()
        && let Some(html) = &body_html
    {
        body_text = html2text::from_read(html.as_bytes(), HTML_TEXT_WIDTH).ok();
    }

    let summary = EmailSummary {
        uid: fetched.uid,
        subject: header_value(&headers, "subject").unwrap_or_else(|| NO_SUBJECT.to_owned()),
        from: header_value(&headers, "from").unwrap_or_default(),
        to: header_value(&headers, "to").unwrap_or_default(),
        date: parse_date(header_value(&headers, "date").as_deref(), now),
        flags: fetched.flags.clone(),
        has_attachments: !attachments.is_empty(),
        size: fetched.size,
    };

    Ok(EmailDetails {
        summary,
        text: body_text,
        html: body_html.map(|h| ammonia::clean(&h)),
        attachments,
        headers: join_headers(&headers),
    })
}

/// Walk MIME part tree recursively
///
/// The first `text/plain` and `text/html` leaves without an attachment
/// disposition become the bodies; every other leaf is an attachment.
fn walk_parts(
    part: &ParsedMail<'_>,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
    attachments: &mut Vec<AttachmentInfo>,
) -> AppResult<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, body_text, body_html, attachments)?;
        }
        return Ok(());
    }

    let ctype = part.ctype.mimetype.to_ascii_lowercase();
    let disp = part.get_content_disposition();
    let filename = disp
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());
    let explicit_attachment = disp.disposition == DispositionType::Attachment || filename.is_some();

    if !explicit_attachment {
        if ctype == "text/plain" && body_text.is_none() {
            *body_text = Some(decode_text(part)?);
            return Ok(());
        }
        if ctype == "text/html" && body_html.is_none() {
            *body_html = Some(decode_text(part)?);
            return Ok(());
        }
        if ctype.starts_with("text/") {
            return Ok(());
        }
    }

    let raw_body = part
        .get_body_raw()
        .map_err(|e| AppError::Parse(format!("failed decoding attachment body: {e}")))?;
    attachments.push(AttachmentInfo {
        filename: filename.unwrap_or_else(|| UNNAMED_ATTACHMENT.to_owned()),
        content_type: if ctype.is_empty() {
            DEFAULT_CONTENT_TYPE.to_owned()
        } else {
            ctype
        },
        size: raw_body.len(),
        content_id: part
            .headers
            .get_first_value("Content-ID")
            .map(|id| id.trim().to_owned()),
    });
    Ok(())
}

fn decode_text(part: &ParsedMail<'_>) -> AppResult<String> {
    part.get_body()
        .map_err(|e| AppError::Parse(format!("failed decoding body part: {e}")))
}

/// Parse a `Date` header, falling back to `now`
pub fn parse_date(value: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(|v| mailparse::dateparse(v).ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or(now)
}

/// Parse header bytes into key-value pairs
pub fn parse_header_bytes(header_bytes: &[u8]) -> AppResult<Vec<(String, String)>> {
    let (headers, _) = mailparse::parse_headers(header_bytes)
        .map_err(|e| AppError::Parse(format!("failed to parse message headers: {e}")))?;
    Ok(to_tuples(&headers))
}

/// Convert mailparse headers to tuples
fn to_tuples(headers: &[MailHeader<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect()
}

/// Merge repeated headers case-insensitively, keeping first-seen order
fn join_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut joined: Vec<(String, String)> = Vec::new();
    for (key, value) in headers {
        match joined.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => joined.push((key.clone(), value.clone())),
        }
    }
    joined
}

/// Get header value by case-insensitive key
fn header_value(headers: &[(String, String)], key: &str) -> Option<String> {
    headers
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(key).then(|| v.clone()))
        .filter(|v| !v.trim().is_empty())
}
