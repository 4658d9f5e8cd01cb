//! Protocol seams between the mailbox session and the wire clients
//!
//! The session only speaks to IMAP through [`ImapConnector`] /
//! [`ImapConnection`] and to SMTP through [`MailSender`]. Production code
//! plugs in `async-imap` and `lettre`; tests plug in an in-memory server.

use std::future::Future;

use crate::errors::AppResult;

/// One entry of an IMAP `LIST` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedMailbox {
    /// Full mailbox name, already decoded from modified UTF-7
    pub name: String,
    /// Hierarchy delimiter reported by the server, if any
    pub delimiter: Option<String>,
}

/// Simplified MIME structure node from `BODYSTRUCTURE`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MimeNode {
    /// Lowercased `type/subtype`
    pub mime_type: String,
    /// Lowercased disposition type (`attachment`, `inline`)
    pub disposition: Option<String>,
    /// Child parts; empty for leaves
    pub children: Vec<MimeNode>,
}

impl MimeNode {
    /// Leaf node with no disposition
    pub fn leaf(mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_ascii_lowercase(),
            disposition: None,
            children: Vec::new(),
        }
    }

    /// Multipart node with the given children
    pub fn multipart(subtype: &str, children: Vec<MimeNode>) -> Self {
        Self {
            mime_type: format!("multipart/{}", subtype.to_ascii_lowercase()),
            disposition: None,
            children,
        }
    }
}

/// Header-level fetch result used for search summaries
#[derive(Debug, Clone, Default)]
pub struct FetchedHeaders {
    /// Message UID
    pub uid: u32,
    /// Flags in server order
    pub flags: Vec<String>,
    /// `RFC822.SIZE`
    pub size: u32,
    /// Raw header block (From, To, Subject, Date)
    pub header_bytes: Vec<u8>,
    /// Parsed `BODYSTRUCTURE`, when the server sent one
    pub structure: Option<MimeNode>,
}

/// Full-message fetch result
#[derive(Debug, Clone, Default)]
pub struct FetchedMessage {
    /// Message UID
    pub uid: u32,
    /// Flags in server order
    pub flags: Vec<String>,
    /// `RFC822.SIZE`
    pub size: u32,
    /// Complete RFC822 source
    pub raw: Vec<u8>,
}

/// Opens authenticated IMAP connections
pub trait ImapConnector: Send + Sync {
    /// Connection type produced by this connector
    type Conn: ImapConnection;

    /// Connect, negotiate TLS, read the greeting and log in
    fn connect(&self) -> impl Future<Output = AppResult<Self::Conn>> + Send;
}

/// IMAP primitives consumed by the mailbox session
///
/// UID sets are passed as slices and rendered by the implementation.
pub trait ImapConnection: Send {
    /// `LIST "" *`
    fn list(&mut self) -> impl Future<Output = AppResult<Vec<ListedMailbox>>> + Send;

    /// `CREATE`
    fn create(&mut self, mailbox: &str) -> impl Future<Output = AppResult<()>> + Send;

    /// `DELETE`
    fn delete(&mut self, mailbox: &str) -> impl Future<Output = AppResult<()>> + Send;

    /// `SELECT` (read-write)
    fn select(&mut self, mailbox: &str) -> impl Future<Output = AppResult<()>> + Send;

    /// `UID SEARCH`; result order is unspecified
    fn uid_search(&mut self, query: &str) -> impl Future<Output = AppResult<Vec<u32>>> + Send;

    /// `UID FETCH` of flags, size, structure and the summary header fields
    fn fetch_headers(
        &mut self,
        uids: &[u32],
    ) -> impl Future<Output = AppResult<Vec<FetchedHeaders>>> + Send;

    /// `UID FETCH` of the full message; `None` when the UID does not exist
    fn fetch_message(
        &mut self,
        uid: u32,
    ) -> impl Future<Output = AppResult<Option<FetchedMessage>>> + Send;

    /// `UID STORE` with a flag query such as `+FLAGS.SILENT (\Seen)`
    fn uid_store(
        &mut self,
        uids: &[u32],
        query: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// `UID COPY`
    fn uid_copy(
        &mut self,
        uids: &[u32],
        mailbox: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// `UID MOVE` (RFC 6851)
    fn uid_move(
        &mut self,
        uids: &[u32],
        mailbox: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// `EXPUNGE` on the selected mailbox
    fn expunge(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    /// `LOGOUT`
    fn logout(self) -> impl Future<Output = AppResult<()>> + Send;
}

/// Attachment carried by an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

/// Validated message ready for SMTP submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

/// Sends one message and returns its `Message-ID`
pub trait MailSender: Send + Sync {
    fn send(&self, message: OutgoingMessage) -> impl Future<Output = AppResult<String>> + Send;
}

/// Render a UID slice as an IMAP sequence set (`4,7,9`)
pub fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
