//! Translation of search filters into IMAP `SEARCH` keys
//!
//! Each present filter becomes one key; keys are ANDed by juxtaposition as
//! IMAP specifies. No filters at all means `ALL`.

use chrono::{Duration as ChronoDuration, NaiveDate};

use crate::errors::{AppError, AppResult};

/// Default mailbox searched when none is given
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Search filters accepted by the mailbox session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Folder to search; `INBOX` when absent
    pub mailbox: Option<String>,
    /// Substring of the From header
    pub from: Option<String>,
    /// Substring of the To header
    pub to: Option<String>,
    /// Substring of the Subject header
    pub subject: Option<String>,
    /// Substring of the body
    pub body: Option<String>,
    /// Only messages without `\Seen`
    pub unread_only: bool,
    /// Messages internally dated on or after N days ago
    pub since_days: Option<u32>,
    /// Messages internally dated before N days ago
    pub before_days: Option<u32>,
    /// Result cap; applied by callers, not by the session
    pub limit: Option<usize>,
}

impl SearchCriteria {
    /// Mailbox to select, falling back to `INBOX`
    pub fn mailbox(&self) -> &str {
        self.mailbox.as_deref().unwrap_or(DEFAULT_MAILBOX)
    }

    /// Individual predicates for every present filter
    ///
    /// Day windows are resolved against `today`.
    pub fn keys(&self, today: NaiveDate) -> Vec<SearchKey> {
        let mut keys = Vec::new();
        if let Some(v) = &self.from {
            keys.push(SearchKey::From(v.clone()));
        }
        if let Some(v) = &self.to {
            keys.push(SearchKey::To(v.clone()));
        }
        if let Some(v) = &self.subject {
            keys.push(SearchKey::Subject(v.clone()));
        }
        if let Some(v) = &self.body {
            keys.push(SearchKey::Body(v.clone()));
        }
        if self.unread_only {
            keys.push(SearchKey::Unseen);
        }
        if let Some(days) = self.since_days {
            keys.push(SearchKey::Since(today - ChronoDuration::days(i64::from(days))));
        }
        if let Some(days) = self.before_days {
            keys.push(SearchKey::Before(today - ChronoDuration::days(i64::from(days))));
        }
        keys
    }

    /// Full IMAP query for `UID SEARCH`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a text filter contains control characters.
    pub fn to_query(&self, today: NaiveDate) -> AppResult<String> {
        let keys = self.keys(today);
        if keys.is_empty() {
            return SearchKey::All.render();
        }
        let rendered = keys
            .iter()
            .map(SearchKey::render)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rendered.join(" "))
    }
}

/// One IMAP search key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    All,
    From(String),
    To(String),
    Subject(String),
    Body(String),
    Unseen,
    Since(NaiveDate),
    Before(NaiveDate),
}

impl SearchKey {
    fn render(&self) -> AppResult<String> {
        Ok(match self {
            Self::All => "ALL".to_owned(),
            Self::From(v) => format!("FROM \"{}\"", escape_imap_quoted(v)?),
            Self::To(v) => format!("TO \"{}\"", escape_imap_quoted(v)?),
            Self::Subject(v) => format!("SUBJECT \"{}\"", escape_imap_quoted(v)?),
            Self::Body(v) => format!("BODY \"{}\"", escape_imap_quoted(v)?),
            Self::Unseen => "UNSEEN".to_owned(),
            Self::Since(d) => format!("SINCE {}", imap_date(*d)),
            Self::Before(d) => format!("BEFORE {}", imap_date(*d)),
        })
    }
}

/// Escape backslashes and quotes for IMAP quoted strings
fn escape_imap_quoted(input: &str) -> AppResult<String> {
    if input.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(
            "search text must not contain control characters".to_owned(),
        ));
    }
    Ok(input.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Format date as IMAP SEARCH date (e.g., "1-Jan-2025")
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}
