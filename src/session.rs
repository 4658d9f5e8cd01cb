//! Mailbox session: one lazily opened IMAP connection plus SMTP sending
//!
//! The IMAP handle lives behind an async mutex so overlapping tool calls are
//! serialized. It is opened on first use, reused afterwards, and discarded
//! when an operation fails at the transport level so that the next call
//! reconnects.

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::folders;
use crate::mime;
use crate::models::{EmailDetails, EmailSummary, SendOutcome};
use crate::search::SearchCriteria;
use crate::transport::{ImapConnection, ImapConnector, MailSender, OutgoingMessage};

/// How a move request was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStrategy {
    /// `UID MOVE` succeeded
    Native,
    /// `UID COPY`, `\Deleted`, `EXPUNGE`
    CopyDelete,
}

/// Mailbox session over a single IMAP connection
pub struct MailboxSession<C: ImapConnector, S: MailSender> {
    connector: C,
    sender: S,
    conn: Mutex<Option<C::Conn>>,
}

impl<C, S> MailboxSession<C, S>
where
    C: ImapConnector,
    S: MailSender,
{
    pub fn new(connector: C, sender: S) -> Self {
        Self {
            connector,
            sender,
            conn: Mutex::new(None),
        }
    }

    /// Open the IMAP connection if it is not open yet
    pub async fn connect(&self) -> AppResult<()> {
        let mut slot = self.conn.lock().await;
        Self::ensure_connected(&self.connector, &mut slot).await?;
        Ok(())
    }

    /// Log out and drop the IMAP connection; no-op when not connected
    pub async fn disconnect(&self) -> AppResult<()> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.take() {
            conn.logout().await?;
            info!("IMAP connection closed");
        }
        Ok(())
    }

    /// Whether an IMAP connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// All folders, parents before children
    pub async fn list_mailboxes(&self) -> AppResult<Vec<String>> {
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = conn.list().await;
        let listed = Self::settle(&mut slot, result)?;
        Ok(folders::flatten(&folders::build_tree(&listed)))
    }

    pub async fn create_mailbox(&self, name: &str) -> AppResult<()> {
        validate_mailbox(name)?;
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = conn.create(name).await;
        Self::settle(&mut slot, result)?;
        info!(mailbox = name, "mailbox created");
        Ok(())
    }

    pub async fn delete_mailbox(&self, name: &str) -> AppResult<()> {
        validate_mailbox(name)?;
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = conn.delete(name).await;
        Self::settle(&mut slot, result)?;
        info!(mailbox = name, "mailbox deleted");
        Ok(())
    }

    /// Search a folder and return summaries, newest first
    ///
    /// Only header fields and protocol attributes are fetched. The criteria
    /// `limit` is not applied here.
    pub async fn search_emails(&self, criteria: &SearchCriteria) -> AppResult<Vec<EmailSummary>> {
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = search_in(conn, criteria).await;
        Self::settle(&mut slot, result)
    }

    /// Fetch and parse one message
    ///
    /// # Errors
    ///
    /// - `NotFound` if the UID does not exist in the folder
    /// - `Parse` if the message cannot be parsed
    pub async fn get_email_details(&self, mailbox: &str, uid: u32) -> AppResult<EmailDetails> {
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = details_in(conn, mailbox, uid).await;
        Self::settle(&mut slot, result)
    }

    /// Move messages, falling back to copy and delete without `MOVE`
    pub async fn move_emails(
        &self,
        mailbox: &str,
        uids: &[u32],
        destination: &str,
    ) -> AppResult<MoveStrategy> {
        require_uids(uids)?;
        if destination.trim().is_empty() {
            return Err(AppError::invalid("destination mailbox must not be empty"));
        }
        validate_mailbox(destination)?;
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = move_in(conn, mailbox, uids, destination).await;
        let strategy = Self::settle(&mut slot, result)?;
        info!(mailbox, destination, count = uids.len(), ?strategy, "messages moved");
        Ok(strategy)
    }

    /// Permanently delete messages (`\Deleted` + `EXPUNGE`)
    pub async fn delete_emails(&self, mailbox: &str, uids: &[u32]) -> AppResult<()> {
        require_uids(uids)?;
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = delete_in(conn, mailbox, uids).await;
        Self::settle(&mut slot, result)?;
        info!(mailbox, count = uids.len(), "messages deleted");
        Ok(())
    }

    /// Add or remove `\Seen`
    pub async fn mark_seen(&self, mailbox: &str, uids: &[u32], seen: bool) -> AppResult<()> {
        let op = if seen { '+' } else { '-' };
        self.store_flags(mailbox, uids, op, &["\\Seen".to_owned()])
            .await
    }

    pub async fn add_flags(&self, mailbox: &str, uids: &[u32], flags: &[String]) -> AppResult<()> {
        self.store_flags(mailbox, uids, '+', flags).await
    }

    pub async fn remove_flags(
        &self,
        mailbox: &str,
        uids: &[u32],
        flags: &[String],
    ) -> AppResult<()> {
        self.store_flags(mailbox, uids, '-', flags).await
    }

    async fn store_flags(
        &self,
        mailbox: &str,
        uids: &[u32],
        op: char,
        flags: &[String],
    ) -> AppResult<()> {
        require_uids(uids)?;
        validate_flags(flags)?;
        let query = format!("{op}FLAGS.SILENT ({})", flags.join(" "));
        let mut slot = self.conn.lock().await;
        let conn = Self::ensure_connected(&self.connector, &mut slot).await?;
        let result = store_in(conn, mailbox, uids, &query).await;
        Self::settle(&mut slot, result)
    }

    /// Send one message; failures are reported in the outcome
    pub async fn send_mail(&self, message: OutgoingMessage) -> SendOutcome {
        let to = message.to.clone();
        match self.sender.send(message).await {
            Ok(message_id) => SendOutcome::sent(message_id),
            Err(e) => {
                warn!(to, error = %e, "send failed");
                SendOutcome::failed(e.to_string())
            }
        }
    }

    async fn ensure_connected<'a>(
        connector: &C,
        slot: &'a mut Option<C::Conn>,
    ) -> AppResult<&'a mut C::Conn> {
        if slot.is_none() {
            debug!("establishing IMAP connection");
            *slot = Some(connector.connect().await?);
            info!("IMAP connection ready");
        }
        slot.as_mut()
            .ok_or_else(|| AppError::Internal("IMAP connection unavailable".to_owned()))
    }

    /// Drop the connection when the result says it is unusable
    fn settle<T>(slot: &mut Option<C::Conn>, result: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &result
            && e.drops_connection()
            && slot.take().is_some()
        {
            warn!(error = %e, "discarding IMAP connection");
        }
        result
    }
}

async fn search_in<Conn: ImapConnection>(
    conn: &mut Conn,
    criteria: &SearchCriteria,
) -> AppResult<Vec<EmailSummary>> {
    let query = criteria.to_query(Utc::now().date_naive())?;
    conn.select(criteria.mailbox()).await?;
    let mut uids = conn.uid_search(&query).await?;
    if uids.is_empty() {
        return Ok(Vec::new());
    }
    uids.sort_unstable_by(|a, b| b.cmp(a));

    let fetched = conn.fetch_headers(&uids).await?;
    let now = Utc::now();
    let mut summaries = fetched
        .iter()
        .map(|f| {
            mime::summarize(f, now).unwrap_or_else(|e| {
                warn!(uid = f.uid, error = %e, "unreadable header block, summarizing with defaults");
                mime::fallback_summary(f, now)
            })
        })
        .collect::<Vec<_>>();
    summaries.sort_unstable_by(|a, b| b.uid.cmp(&a.uid));
    debug!(mailbox = criteria.mailbox(), matched = summaries.len(), "search finished");
    Ok(summaries)
}

async fn details_in<Conn: ImapConnection>(
    conn: &mut Conn,
    mailbox: &str,
    uid: u32,
) -> AppResult<EmailDetails> {
    conn.select(mailbox).await?;
    let fetched = conn.fetch_message(uid).await?.ok_or_else(|| {
        AppError::NotFound(format!("message uid {uid} not found in mailbox '{mailbox}'"))
    })?;
    mime::parse_message(&fetched, Utc::now())
}

async fn move_in<Conn: ImapConnection>(
    conn: &mut Conn,
    mailbox: &str,
    uids: &[u32],
    destination: &str,
) -> AppResult<MoveStrategy> {
    conn.select(mailbox).await?;
    match conn.uid_move(uids, destination).await {
        Ok(()) => {
            // Some servers leave moved messages behind flagged \Deleted.
            if let Err(e) = conn.expunge().await {
                if e.drops_connection() {
                    return Err(e);
                }
                warn!(mailbox, error = %e, "expunge after move failed");
            }
            Ok(MoveStrategy::Native)
        }
        Err(e) if !e.drops_connection() => {
            warn!(mailbox, error = %e, "UID MOVE rejected; falling back to copy and delete");
            conn.uid_copy(uids, destination).await?;
            conn.uid_store(uids, "+FLAGS.SILENT (\\Deleted)").await?;
            conn.expunge().await?;
            Ok(MoveStrategy::CopyDelete)
        }
        Err(e) => Err(e),
    }
}

async fn delete_in<Conn: ImapConnection>(
    conn: &mut Conn,
    mailbox: &str,
    uids: &[u32],
) -> AppResult<()> {
    conn.select(mailbox).await?;
    conn.uid_store(uids, "+FLAGS.SILENT (\\Deleted)").await?;
    conn.expunge().await
}

async fn store_in<Conn: ImapConnection>(
    conn: &mut Conn,
    mailbox: &str,
    uids: &[u32],
    query: &str,
) -> AppResult<()> {
    conn.select(mailbox).await?;
    conn.uid_store(uids, query).await
}

fn require_uids(uids: &[u32]) -> AppResult<()> {
    if uids.is_empty() {
        return Err(AppError::invalid("at least one uid is required"));
    }
    Ok(())
}

/// Reject names that would break the command line; legality is the server's call
fn validate_mailbox(mailbox: &str) -> AppResult<()> {
    if mailbox.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::invalid(
            "mailbox must not contain control characters",
        ));
    }
    Ok(())
}

/// Reject flag names that would break the `STORE` command
fn validate_flags(flags: &[String]) -> AppResult<()> {
    if flags.is_empty() {
        return Err(AppError::invalid("at least one flag is required"));
    }
    for flag in flags {
        validate_flag(flag).map_err(|_| {
            AppError::InvalidInput(format!(
                "invalid flag '{flag}'; flags must not contain whitespace, control chars, quotes, parentheses, or braces"
            ))
        })?;
    }
    Ok(())
}

fn validate_flag(flag: &str) -> AppResult<()> {
    let atom = flag.strip_prefix('\\').unwrap_or(flag);
    if atom.is_empty()
        || atom.chars().any(|ch| {
            ch.is_ascii_control()
                || ch.is_ascii_whitespace()
                || matches!(ch, '"' | '(' | ')' | '{' | '}' | '\\')
        })
    {
        return Err(AppError::invalid("invalid flag"));
    }
    Ok(())
}
