//! IMAP transport built on `async-imap`
//!
//! Provides timeout-bounded wrappers around `async-imap` operations and
//! implements the [`ImapConnector`] / [`ImapConnection`] seams. Connections
//! use implicit TLS or a `STARTTLS` upgrade, and timeouts are derived from
//! server config.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use futures::TryStreamExt;
use imap_proto::types::BodyStructure;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::{EndpointConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::transport::{
    FetchedHeaders, FetchedMessage, ImapConnection, ImapConnector, ListedMailbox, MimeNode,
    uid_set,
};

/// Type alias for authenticated IMAP session over TLS
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Items fetched for search summaries
const SUMMARY_QUERY: &str =
    "(UID FLAGS RFC822.SIZE BODYSTRUCTURE BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)])";
/// Items fetched for full message details
const MESSAGE_QUERY: &str = "(UID FLAGS RFC822.SIZE BODY.PEEK[])";

/// Timeouts applied to each connection phase
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub greeting: Duration,
    pub socket: Duration,
}

impl Timeouts {
    fn from_config(config: &ServerConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_timeout_ms),
            greeting: Duration::from_millis(config.greeting_timeout_ms),
            socket: Duration::from_millis(config.socket_timeout_ms),
        }
    }
}

/// Connector that opens TLS IMAP sessions for the configured account
#[derive(Debug, Clone)]
pub struct TlsImapConnector {
    endpoint: EndpointConfig,
    timeouts: Timeouts,
}

impl TlsImapConnector {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            endpoint: config.imap.clone(),
            timeouts: Timeouts::from_config(config),
        }
    }
}

impl ImapConnector for TlsImapConnector {
    type Conn = ImapClient;

    async fn connect(&self) -> AppResult<ImapClient> {
        let session = connect_authenticated(&self.endpoint, self.timeouts).await?;
        Ok(ImapClient {
            session,
            timeouts: self.timeouts,
        })
    }
}

/// Connect to IMAP server and authenticate
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. With `secure: false`, read the plaintext greeting and issue `STARTTLS`
/// 3. TLS handshake with webpki root certificates
/// 4. Read IMAP greeting (implicit TLS only)
/// 5. LOGIN authentication
///
/// # Security
///
/// Credentials are only ever sent over TLS; a server that refuses
/// `STARTTLS` is not logged into.
///
/// # Errors
///
/// - `InvalidInput` if hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `AuthFailed` if authentication fails
/// - `Protocol` if the server rejects `STARTTLS`
/// - `Connection` for TCP, TLS, or greeting failures
pub async fn connect_authenticated(
    endpoint: &EndpointConfig,
    timeouts: Timeouts,
) -> AppResult<ImapSession> {
    debug!(
        host = %endpoint.host,
        port = endpoint.port,
        secure = endpoint.secure,
        "opening IMAP connection"
    );
    let mut tcp = timeout(
        timeouts.connect,
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Connection(format!("tcp connect failed: {e}"))))?;

    if !endpoint.secure {
        timeout(timeouts.greeting, starttls_handshake(&mut tcp))
            .await
            .map_err(|_| AppError::Timeout("STARTTLS negotiation timeout".to_owned()))??;
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(timeouts.greeting, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|e| AppError::Connection(format!("TLS handshake failed: {e}")))
        })?;

    let mut client = Client::new(tls_stream);
    // After STARTTLS the server does not greet again.
    if endpoint.secure {
        let greeting = timeout(timeouts.greeting, client.read_response())
            .await
            .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Connection(format!("IMAP greeting failed: {e}")))
            })?;

        if greeting.is_none() {
            return Err(AppError::Connection(
                "IMAP server closed connection before greeting".to_owned(),
            ));
        }
    }

    let pass = endpoint.pass.expose_secret();
    let session = timeout(
        timeouts.greeting,
        client.login(endpoint.user.as_str(), pass),
    )
    .await
    .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
    .and_then(|r| {
        r.map_err(|(e, _)| {
            let msg = e.to_string();
            if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                AppError::AuthFailed(msg)
            } else {
                AppError::Connection(msg)
            }
        })
    })?;

    Ok(session)
}

/// Tag of the one command sent before the IMAP client takes over the stream
const STARTTLS_TAG: &str = "a0";

/// Read the plaintext greeting and negotiate `STARTTLS`
///
/// Untagged lines between the command and its completion (such as a
/// `CAPABILITY` push) are skipped. On success the stream is ready for the
/// TLS handshake.
async fn starttls_handshake<S>(stream: &mut S) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = read_line(stream).await?;
    if !greeting.starts_with("* OK") {
        return Err(AppError::Connection(format!(
            "unexpected IMAP greeting: {greeting}"
        )));
    }

    write_line(stream, &format!("{STARTTLS_TAG} STARTTLS")).await?;
    let done = format!("{STARTTLS_TAG} ");
    loop {
        let line = read_line(stream).await?;
        let Some(status) = line.strip_prefix(&done) else {
            continue;
        };
        if status.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("OK")) {
            return Ok(());
        }
        return Err(AppError::Protocol(format!("STARTTLS: {status}")));
    }
}

/// Read one CRLF-terminated line without buffering past it
async fn read_line<S>(stream: &mut S) -> AppResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| AppError::Connection(format!("STARTTLS read failed: {e}")))?;
        if n == 0 {
            return Err(AppError::Connection(
                "IMAP server closed connection during STARTTLS".to_owned(),
            ));
        }
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte[0]);
    }
}

async fn write_line<S>(stream: &mut S, line: &str) -> AppResult<()>
where
    S: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await
    };
    write
        .await
        .map_err(|e| AppError::Connection(format!("STARTTLS write failed: {e}")))
}

/// Authenticated IMAP connection
pub struct ImapClient {
    session: ImapSession,
    timeouts: Timeouts,
}

/// Await an `async-imap` call under the socket timeout
async fn bounded<T, F>(limit: Duration, command: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = async_imap::error::Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(format!("{command} timed out")))?
        .map_err(|e| classify(command, e))
}

/// Map an `async-imap` error onto the application taxonomy
///
/// NO/BAD responses are server rejections; I/O errors leave the
/// connection unusable.
fn classify(command: &str, err: async_imap::error::Error) -> AppError {
    use async_imap::error::Error;
    match err {
        Error::No(msg) | Error::Bad(msg) => AppError::Protocol(format!("{command}: {msg}")),
        Error::Io(e) => AppError::Connection(format!("{command} failed: {e}")),
        Error::ConnectionLost => AppError::Connection(format!("{command}: connection lost")),
        other => AppError::Internal(format!("{command} failed: {other}")),
    }
}

/// Encode a mailbox name as IMAP modified UTF-7
fn wire_name(mailbox: &str) -> String {
    utf7_imap::encode_utf7_imap(mailbox.to_owned())
}

/// Convert fetch flags to their protocol spelling
pub fn flags_to_strings(fetch: &Fetch) -> Vec<String> {
    fetch
        .flags()
        .map(|flag| match flag {
            Flag::Seen => "\\Seen".to_owned(),
            Flag::Answered => "\\Answered".to_owned(),
            Flag::Flagged => "\\Flagged".to_owned(),
            Flag::Deleted => "\\Deleted".to_owned(),
            Flag::Draft => "\\Draft".to_owned(),
            Flag::Recent => "\\Recent".to_owned(),
            Flag::MayCreate => "\\*".to_owned(),
            Flag::Custom(name) => name.to_string(),
        })
        .collect()
}

/// Reduce a `BODYSTRUCTURE` to type, disposition and children
fn mime_node(structure: &BodyStructure<'_>) -> MimeNode {
    match structure {
        BodyStructure::Basic { common, .. }
        | BodyStructure::Text { common, .. }
        | BodyStructure::Message { common, .. } => MimeNode {
            mime_type: format!("{}/{}", common.ty.ty, common.ty.subtype).to_ascii_lowercase(),
            disposition: common
                .disposition
                .as_ref()
                .map(|d| d.ty.to_ascii_lowercase()),
            children: Vec::new(),
        },
        BodyStructure::Multipart { common, bodies, .. } => MimeNode {
            mime_type: format!("multipart/{}", common.ty.subtype).to_ascii_lowercase(),
            disposition: common
                .disposition
                .as_ref()
                .map(|d| d.ty.to_ascii_lowercase()),
            children: bodies.iter().map(mime_node).collect(),
        },
    }
}

impl ImapConnection for ImapClient {
    async fn list(&mut self) -> AppResult<Vec<ListedMailbox>> {
        let socket = self.timeouts.socket;
        let stream = bounded(socket, "LIST", self.session.list(None, Some("*"))).await?;
        let names: Vec<_> = bounded(socket, "LIST", stream.try_collect::<Vec<_>>()).await?;
        Ok(names
            .iter()
            .map(|item| ListedMailbox {
                name: utf7_imap::decode_utf7_imap(item.name().to_owned()),
                delimiter: item.delimiter().map(|d| d.to_string()),
            })
            .collect())
    }

    async fn create(&mut self, mailbox: &str) -> AppResult<()> {
        bounded(
            self.timeouts.socket,
            "CREATE",
            self.session.create(wire_name(mailbox)),
        )
        .await
    }

    async fn delete(&mut self, mailbox: &str) -> AppResult<()> {
        bounded(
            self.timeouts.socket,
            "DELETE",
            self.session.delete(wire_name(mailbox)),
        )
        .await
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<()> {
        bounded(
            self.timeouts.socket,
            "SELECT",
            self.session.select(wire_name(mailbox)),
        )
        .await
        .map_err(|e| match e {
            AppError::Protocol(msg) => {
                AppError::NotFound(format!("cannot select mailbox '{mailbox}': {msg}"))
            }
            other => other,
        })?;
        Ok(())
    }

    async fn uid_search(&mut self, query: &str) -> AppResult<Vec<u32>> {
        debug!(query, "UID SEARCH");
        let set = bounded(
            self.timeouts.socket,
            "UID SEARCH",
            self.session.uid_search(query),
        )
        .await?;
        Ok(set.into_iter().collect())
    }

    async fn fetch_headers(&mut self, uids: &[u32]) -> AppResult<Vec<FetchedHeaders>> {
        let socket = self.timeouts.socket;
        let stream = bounded(
            socket,
            "UID FETCH",
            self.session.uid_fetch(uid_set(uids), SUMMARY_QUERY),
        )
        .await?;
        let fetches: Vec<Fetch> = bounded(socket, "UID FETCH", stream.try_collect()).await?;

        let mut out = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                continue;
            };
            out.push(FetchedHeaders {
                uid,
                flags: flags_to_strings(fetch),
                size: fetch.size.unwrap_or(0),
                header_bytes: fetch
                    .header()
                    .or_else(|| fetch.body())
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default(),
                structure: fetch.bodystructure().map(mime_node),
            });
        }
        Ok(out)
    }

    async fn fetch_message(&mut self, uid: u32) -> AppResult<Option<FetchedMessage>> {
        let socket = self.timeouts.socket;
        let stream = bounded(
            socket,
            "UID FETCH",
            self.session.uid_fetch(uid.to_string(), MESSAGE_QUERY),
        )
        .await?;
        let fetches: Vec<Fetch> = bounded(socket, "UID FETCH", stream.try_collect()).await?;

        // Servers may also push unsolicited FETCH responses for other messages.
        let Some(fetch) = fetches.iter().find(|f| f.uid == Some(uid)) else {
            return Ok(None);
        };
        let raw = fetch
            .body()
            .ok_or_else(|| AppError::Parse(format!("message uid {uid} has no body")))?;
        Ok(Some(FetchedMessage {
            uid,
            flags: flags_to_strings(fetch),
            size: fetch.size.unwrap_or(raw.len() as u32),
            raw: raw.to_vec(),
        }))
    }

    async fn uid_store(&mut self, uids: &[u32], query: &str) -> AppResult<()> {
        let socket = self.timeouts.socket;
        let stream = bounded(
            socket,
            "UID STORE",
            self.session.uid_store(uid_set(uids), query),
        )
        .await?;
        let _: Vec<Fetch> = bounded(socket, "UID STORE", stream.try_collect()).await?;
        Ok(())
    }

    async fn uid_copy(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        bounded(
            self.timeouts.socket,
            "UID COPY",
            self.session.uid_copy(uid_set(uids), wire_name(mailbox)),
        )
        .await
    }

    async fn uid_move(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        bounded(
            self.timeouts.socket,
            "UID MOVE",
            self.session.uid_mv(uid_set(uids), wire_name(mailbox)),
        )
        .await
    }

    async fn expunge(&mut self) -> AppResult<()> {
        let socket = self.timeouts.socket;
        let stream = bounded(socket, "EXPUNGE", self.session.expunge()).await?;
        let _: Vec<u32> = bounded(socket, "EXPUNGE", stream.try_collect()).await?;
        Ok(())
    }

    async fn logout(mut self) -> AppResult<()> {
        bounded(self.timeouts.socket, "LOGOUT", self.session.logout()).await
    }
}
