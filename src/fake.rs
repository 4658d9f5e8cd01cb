//! In-memory IMAP server and SMTP sender for tests
//!
//! Every command is appended to a log so tests can assert on the exact
//! protocol sequence a tool produced.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{AppError, AppResult};
use crate::session::MailboxSession;
use crate::transport::{
    FetchedHeaders, FetchedMessage, ImapConnection, ImapConnector, ListedMailbox, MailSender,
    MimeNode, OutgoingMessage, uid_set,
};

#[derive(Debug, Clone)]
struct FakeMessage {
    uid: u32,
    flags: Vec<String>,
    raw: Vec<u8>,
    structure: MimeNode,
}

#[derive(Debug)]
struct FakeMailbox {
    name: String,
    next_uid: u32,
    messages: Vec<FakeMessage>,
}

impl FakeMailbox {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            next_uid: 1,
            messages: Vec::new(),
        }
    }

    fn append(&mut self, raw: Vec<u8>, flags: Vec<String>, structure: MimeNode) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;
        self.messages.push(FakeMessage {
            uid,
            flags,
            raw,
            structure,
        });
        uid
    }
}

#[derive(Debug)]
struct State {
    mailboxes: Vec<FakeMailbox>,
    supports_move: bool,
    fail_expunge: bool,
    fail_next: Option<AppError>,
    connects: usize,
    log: Vec<String>,
}

impl State {
    fn mailbox(&self, name: &str) -> Option<&FakeMailbox> {
        self.mailboxes.iter().find(|m| m.name == name)
    }

    fn mailbox_mut(&mut self, name: &str) -> Option<&mut FakeMailbox> {
        self.mailboxes.iter_mut().find(|m| m.name == name)
    }
}

/// Shared handle to the fake server state
#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl FakeServer {
    /// Server with an `INBOX` holding `count` plain text messages (UIDs 1..=count)
    pub fn with_inbox(count: u32) -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(State {
                mailboxes: vec![FakeMailbox::new("INBOX")],
                supports_move: true,
                fail_expunge: false,
                fail_next: None,
                connects: 0,
                log: Vec::new(),
            })),
        };
        for i in 1..=count {
            let day = (i - 1) % 28 + 1;
            let raw = format!(
                "From: sender{i}@example.com\r\nTo: me@example.com\r\nSubject: Message {i}\r\nDate: {day} Jan 2025 10:00:00 +0000\r\n\r\nBody of message {i}\r\n"
            );
            server.add_message("INBOX", raw.as_bytes(), MimeNode::leaf("text/plain"));
        }
        server
    }

    pub fn session<S: MailSender>(&self, sender: S) -> MailboxSession<FakeConnector, S> {
        MailboxSession::new(self.connector(), sender)
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            state: Arc::clone(&self.state),
        }
    }

    pub fn add_mailbox(&self, name: &str) {
        self.lock().mailboxes.push(FakeMailbox::new(name));
    }

    /// Append a message and return its UID
    pub fn add_message(&self, mailbox: &str, raw: &[u8], structure: MimeNode) -> u32 {
        let mut state = self.lock();
        let mailbox = state
            .mailbox_mut(mailbox)
            .expect("mailbox must exist before adding messages");
        mailbox.append(raw.to_vec(), Vec::new(), structure)
    }

    /// Make `UID MOVE` fail the way servers without RFC 6851 do
    pub fn disable_move(&self) {
        self.lock().supports_move = false;
    }

    /// Make every `EXPUNGE` fail with a server rejection
    pub fn fail_expunge(&self) {
        self.lock().fail_expunge = true;
    }

    /// Fail the next command (or connect) with `err`
    pub fn fail_next(&self, err: AppError) {
        self.lock().fail_next = Some(err);
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.lock().log.iter().any(|c| c == command)
    }

    /// Number of logged commands starting with `prefix`
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Commands logged after the last occurrence of `command`
    pub fn commands_after(&self, command: &str) -> Vec<String> {
        let log = self.log();
        match log.iter().rposition(|c| c == command) {
            Some(idx) => log[idx + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// UIDs currently in a mailbox, ascending
    pub fn uids(&self, mailbox: &str) -> Vec<u32> {
        self.lock()
            .mailbox(mailbox)
            .map(|m| m.messages.iter().map(|msg| msg.uid).collect())
            .unwrap_or_default()
    }

    pub fn mailbox_len(&self, mailbox: &str) -> usize {
        self.uids(mailbox).len()
    }

    pub fn mailbox_names(&self) -> Vec<String> {
        self.lock().mailboxes.iter().map(|m| m.name.clone()).collect()
    }

    pub fn flags(&self, mailbox: &str, uid: u32) -> Vec<String> {
        self.lock()
            .mailbox(mailbox)
            .and_then(|m| m.messages.iter().find(|msg| msg.uid == uid))
            .map(|msg| msg.flags.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake state lock")
    }
}

/// Connector that hands out [`FakeConnection`]s
#[derive(Debug, Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<State>>,
}

impl ImapConnector for FakeConnector {
    type Conn = FakeConnection;

    async fn connect(&self) -> AppResult<FakeConnection> {
        let mut state = self.state.lock().expect("fake state lock");
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        state.connects += 1;
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            selected: None,
        })
    }
}

/// One logged-in fake connection
#[derive(Debug)]
pub struct FakeConnection {
    state: Arc<Mutex<State>>,
    selected: Option<String>,
}

impl FakeConnection {
    /// Log `command` and consume any injected failure
    fn begin(&self, command: String) -> AppResult<MutexGuard<'_, State>> {
        let mut state = self.state.lock().expect("fake state lock");
        state.log.push(command);
        match state.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    fn selected(&self) -> AppResult<String> {
        self.selected
            .clone()
            .ok_or_else(|| AppError::Protocol("BAD no mailbox selected".to_owned()))
    }
}

fn missing(name: &str) -> AppError {
    AppError::Protocol(format!("NO [TRYCREATE] mailbox '{name}' does not exist"))
}

impl ImapConnection for FakeConnection {
    async fn list(&mut self) -> AppResult<Vec<ListedMailbox>> {
        let state = self.begin("LIST".to_owned())?;
        Ok(state
            .mailboxes
            .iter()
            .map(|m| ListedMailbox {
                name: m.name.clone(),
                delimiter: Some("/".to_owned()),
            })
            .collect())
    }

    async fn create(&mut self, mailbox: &str) -> AppResult<()> {
        let mut state = self.begin(format!("CREATE {mailbox}"))?;
        if mailbox.trim().is_empty() {
            return Err(AppError::Protocol("BAD invalid mailbox name".to_owned()));
        }
        if state.mailbox(mailbox).is_some() {
            return Err(AppError::Protocol(format!(
                "NO [ALREADYEXISTS] mailbox '{mailbox}' already exists"
            )));
        }
        state.mailboxes.push(FakeMailbox::new(mailbox));
        Ok(())
    }

    async fn delete(&mut self, mailbox: &str) -> AppResult<()> {
        let mut state = self.begin(format!("DELETE {mailbox}"))?;
        let before = state.mailboxes.len();
        state.mailboxes.retain(|m| m.name != mailbox);
        if state.mailboxes.len() == before {
            return Err(AppError::Protocol(format!(
                "NO [NONEXISTENT] mailbox '{mailbox}' does not exist"
            )));
        }
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<()> {
        let exists = {
            let state = self.begin(format!("SELECT {mailbox}"))?;
            state.mailbox(mailbox).is_some()
        };
        if !exists {
            return Err(AppError::NotFound(format!("mailbox '{mailbox}' not found")));
        }
        self.selected = Some(mailbox.to_owned());
        Ok(())
    }

    async fn uid_search(&mut self, query: &str) -> AppResult<Vec<u32>> {
        let selected = self.selected()?;
        let state = self.begin(format!("SEARCH {query}"))?;
        Ok(state
            .mailbox(&selected)
            .map(|m| m.messages.iter().map(|msg| msg.uid).collect())
            .unwrap_or_default())
    }

    async fn fetch_headers(&mut self, uids: &[u32]) -> AppResult<Vec<FetchedHeaders>> {
        let selected = self.selected()?;
        let state = self.begin(format!("FETCH {}", uid_set(uids)))?;
        let Some(mailbox) = state.mailbox(&selected) else {
            return Err(missing(&selected));
        };
        // Real servers answer in mailbox order, not request order.
        Ok(mailbox
            .messages
            .iter()
            .filter(|msg| uids.contains(&msg.uid))
            .map(|msg| FetchedHeaders {
                uid: msg.uid,
                flags: msg.flags.clone(),
                size: msg.raw.len() as u32,
                header_bytes: msg.raw.clone(),
                structure: Some(msg.structure.clone()),
            })
            .collect())
    }

    async fn fetch_message(&mut self, uid: u32) -> AppResult<Option<FetchedMessage>> {
        let selected = self.selected()?;
        let state = self.begin(format!("FETCH {uid} BODY[]"))?;
        Ok(state
            .mailbox(&selected)
            .and_then(|m| m.messages.iter().find(|msg| msg.uid == uid))
            .map(|msg| FetchedMessage {
                uid: msg.uid,
                flags: msg.flags.clone(),
                size: msg.raw.len() as u32,
                raw: msg.raw.clone(),
            }))
    }

    async fn uid_store(&mut self, uids: &[u32], query: &str) -> AppResult<()> {
        let selected = self.selected()?;
        let mut state = self.begin(format!("STORE {} {query}", uid_set(uids)))?;
        let adding = query.starts_with('+');
        let names: Vec<String> = query
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once(')'))
            .map(|(inner, _)| inner.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        let Some(mailbox) = state.mailbox_mut(&selected) else {
            return Err(missing(&selected));
        };
        for msg in mailbox.messages.iter_mut().filter(|m| uids.contains(&m.uid)) {
            for name in &names {
                let present = msg.flags.iter().any(|f| f == name);
                if adding && !present {
                    msg.flags.push(name.clone());
                } else if !adding {
                    msg.flags.retain(|f| f != name);
                }
            }
        }
        Ok(())
    }

    async fn uid_copy(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        let selected = self.selected()?;
        let mut state = self.begin(format!("COPY {} {mailbox}", uid_set(uids)))?;
        copy_messages(&mut state, &selected, uids, mailbox)
    }

    async fn uid_move(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        let selected = self.selected()?;
        let mut state = self.begin(format!("MOVE {} {mailbox}", uid_set(uids)))?;
        if !state.supports_move {
            return Err(AppError::Protocol("BAD unknown command MOVE".to_owned()));
        }
        copy_messages(&mut state, &selected, uids, mailbox)?;
        if let Some(source) = state.mailbox_mut(&selected) {
            source.messages.retain(|m| !uids.contains(&m.uid));
        }
        Ok(())
    }

    async fn expunge(&mut self) -> AppResult<()> {
        let selected = self.selected()?;
        let mut state = self.begin("EXPUNGE".to_owned())?;
        if state.fail_expunge {
            return Err(AppError::Protocol("NO expunge failed".to_owned()));
        }
        if let Some(mailbox) = state.mailbox_mut(&selected) {
            mailbox
                .messages
                .retain(|m| !m.flags.iter().any(|f| f == "\\Deleted"));
        }
        Ok(())
    }

    async fn logout(self) -> AppResult<()> {
        let _state = self.begin("LOGOUT".to_owned())?;
        Ok(())
    }
}

fn copy_messages(state: &mut State, source: &str, uids: &[u32], dest: &str) -> AppResult<()> {
    let copies: Vec<FakeMessage> = state
        .mailbox(source)
        .map(|m| {
            m.messages
                .iter()
                .filter(|msg| uids.contains(&msg.uid))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let Some(target) = state.mailbox_mut(dest) else {
        return Err(missing(dest));
    };
    for msg in copies {
        target.append(msg.raw, msg.flags, msg.structure);
    }
    Ok(())
}

/// Sender that records messages instead of submitting them
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    failure: Option<String>,
}

impl RecordingSender {
    /// Sender whose every submission fails with `reason`
    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(reason.to_owned()),
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl MailSender for RecordingSender {
    async fn send(&self, message: OutgoingMessage) -> AppResult<String> {
        if let Some(reason) = &self.failure {
            return Err(AppError::Connection(format!("SMTP send failed: {reason}")));
        }
        let mut sent = self.sent.lock().expect("sent lock");
        sent.push(message);
        Ok(format!("<fake-{}@example.com>", sent.len()))
    }
}
