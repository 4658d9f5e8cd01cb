//! Tool dispatch policies
//!
//! Sits between the MCP surface and the mailbox session. Applies the
//! tool-level policies (preview-before-delete, non-empty folder guard,
//! result limits, client-side paging, `send_mail` validation) and renders
//! every outcome as text. Errors never escape as faults.

use std::time::Instant;

use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::format::{self, ToolReply};
use crate::models::{
    DeleteEmailsInput, FlagsInput, GetEmailInput, ListAllEmailsInput, MailboxNameInput,
    MarkSeenInput, MoveEmailsInput, SearchEmailsInput, SendMailInput,
};
use crate::pagination::{self, PageRequest};
use crate::search::SearchCriteria;
use crate::session::{MailboxSession, MoveStrategy};
use crate::transport::{ImapConnector, MailSender};
use crate::validation;

/// Results shown by `search_emails` when no limit is given
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

pub struct Dispatcher<C: ImapConnector, S: MailSender> {
    session: MailboxSession<C, S>,
}

impl<C, S> Dispatcher<C, S>
where
    C: ImapConnector,
    S: MailSender,
{
    pub fn new(session: MailboxSession<C, S>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &MailboxSession<C, S> {
        &self.session
    }

    pub async fn list_mailboxes(&self) -> ToolReply {
        let started = Instant::now();
        let result = self
            .session
            .list_mailboxes()
            .await
            .map(|names| format::mailboxes(&names));
        finalize("list_mailboxes", "list mailboxes", started, result)
    }

    pub async fn create_mailbox(&self, input: MailboxNameInput) -> ToolReply {
        let started = Instant::now();
        let result = self
            .session
            .create_mailbox(&input.name)
            .await
            .map(|()| format!("Mailbox '{}' created.", input.name));
        finalize("create_mailbox", "create mailbox", started, result)
    }

    /// Delete a folder only when a one-message search finds it empty
    pub async fn delete_mailbox(&self, input: MailboxNameInput) -> ToolReply {
        let started = Instant::now();
        let occupancy = SearchCriteria {
            mailbox: Some(input.name.clone()),
            limit: Some(1),
            ..Default::default()
        };
        let result = match self.session.search_emails(&occupancy).await {
            Ok(found) if !found.is_empty() => {
                debug!(mailbox = %input.name, "refusing to delete non-empty mailbox");
                let reply = ToolReply::error(format!(
                    "Mailbox '{}' is not empty. Move or delete its emails before deleting the mailbox.",
                    input.name
                ));
                return record("delete_mailbox", started, reply);
            }
            Ok(_) => self
                .session
                .delete_mailbox(&input.name)
                .await
                .map(|()| format!("Mailbox '{}' deleted.", input.name)),
            Err(e) => Err(e),
        };
        finalize("delete_mailbox", "delete mailbox", started, result)
    }

    /// Search and show at most `limit` of the newest matches
    pub async fn search_emails(&self, input: SearchEmailsInput) -> ToolReply {
        let started = Instant::now();
        let criteria = input.criteria();
        let limit = criteria.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);
        let result = self.session.search_emails(&criteria).await.map(|found| {
            let shown = &found[..found.len().min(limit)];
            format::search_results(criteria.mailbox(), shown, found.len())
        });
        finalize("search_emails", "search emails", started, result)
    }

    pub async fn get_email(&self, input: GetEmailInput) -> ToolReply {
        let started = Instant::now();
        let result = self
            .session
            .get_email_details(&input.mailbox, input.uid)
            .await
            .map(|details| format::details(&input.mailbox, &details));
        finalize("get_email", "get email", started, result)
    }

    /// Fetch every summary in the folder and slice one page locally
    pub async fn list_all_emails(&self, input: ListAllEmailsInput) -> ToolReply {
        let started = Instant::now();
        let request = PageRequest::new(input.page, input.page_size);
        let criteria = SearchCriteria {
            mailbox: Some(input.mailbox.clone()),
            ..Default::default()
        };
        let result = self.session.search_emails(&criteria).await.map(|all| {
            let page = pagination::paginate(all, request);
            format::page(&input.mailbox, &page)
        });
        finalize("list_all_emails", "list emails", started, result)
    }

    pub async fn move_emails(&self, input: MoveEmailsInput) -> ToolReply {
        let started = Instant::now();
        let result: AppResult<String> = async {
            require_uids(&input.uids)?;
            if input.destination.trim().is_empty() {
                return Err(AppError::invalid("destination mailbox is required"));
            }
            let strategy = self
                .session
                .move_emails(&input.mailbox, &input.uids, &input.destination)
                .await?;
            let mut text = format!(
                "Moved {} email(s) from {} to {} (UIDs: {}).",
                input.uids.len(),
                input.mailbox,
                input.destination,
                format::uid_list(&input.uids)
            );
            if strategy == MoveStrategy::CopyDelete {
                text.push_str(" The server does not support MOVE, so the emails were copied and the originals expunged.");
            }
            Ok(text)
        }
        .await;
        finalize("move_emails", "move emails", started, result)
    }

    /// Preview unless `preview` is literally `false`
    pub async fn delete_emails(&self, input: DeleteEmailsInput) -> ToolReply {
        let started = Instant::now();
        let result: AppResult<String> = async {
            require_uids(&input.uids)?;
            if !input.confirmed() {
                return Ok(format::delete_preview(&input.mailbox, &input.uids));
            }
            self.session
                .delete_emails(&input.mailbox, &input.uids)
                .await?;
            Ok(format!(
                "Permanently deleted {} email(s) from {} (UIDs: {}).",
                input.uids.len(),
                input.mailbox,
                format::uid_list(&input.uids)
            ))
        }
        .await;
        finalize("delete_emails", "delete emails", started, result)
    }

    pub async fn mark_seen(&self, input: MarkSeenInput) -> ToolReply {
        let started = Instant::now();
        let result: AppResult<String> = async {
            require_uids(&input.uids)?;
            self.session
                .mark_seen(&input.mailbox, &input.uids, input.seen)
                .await?;
            let state = if input.seen { "read" } else { "unread" };
            Ok(format!(
                "Marked {} email(s) in {} as {state}.",
                input.uids.len(),
                input.mailbox
            ))
        }
        .await;
        finalize("mark_seen", "update seen flag", started, result)
    }

    pub async fn add_flags(&self, input: FlagsInput) -> ToolReply {
        let started = Instant::now();
        let result: AppResult<String> = async {
            require_uids(&input.uids)?;
            self.session
                .add_flags(&input.mailbox, &input.uids, &input.flags)
                .await?;
            Ok(format!(
                "Added flags {} to {} email(s) in {}.",
                input.flags.join(" "),
                input.uids.len(),
                input.mailbox
            ))
        }
        .await;
        finalize("add_flags", "add flags", started, result)
    }

    pub async fn remove_flags(&self, input: FlagsInput) -> ToolReply {
        let started = Instant::now();
        let result: AppResult<String> = async {
            require_uids(&input.uids)?;
            self.session
                .remove_flags(&input.mailbox, &input.uids, &input.flags)
                .await?;
            Ok(format!(
                "Removed flags {} from {} email(s) in {}.",
                input.flags.join(" "),
                input.uids.len(),
                input.mailbox
            ))
        }
        .await;
        finalize("remove_flags", "remove flags", started, result)
    }

    /// Validate, then send; invalid requests never reach the sender
    pub async fn send_mail(&self, input: SendMailInput) -> ToolReply {
        let started = Instant::now();
        let message = match validation::validate_send(&input) {
            Ok(message) => message,
            Err(errors) => {
                debug!(problems = errors.len(), "send_mail arguments rejected");
                let reply = ToolReply::error(format::field_errors(&errors));
                return record("send_mail", started, reply);
            }
        };
        let to = message.to.clone();
        let outcome = self.session.send_mail(message).await;
        let reply = match (outcome.success, outcome.message_id, outcome.error) {
            (true, Some(id), _) => ToolReply::ok(format!("Email sent to {to} (Message-ID: {id}).")),
            (true, None, _) => ToolReply::ok(format!("Email sent to {to}.")),
            (false, _, error) => ToolReply::error(format!(
                "Failed to send email: {}",
                error.unwrap_or_else(|| "unknown error".to_owned())
            )),
        };
        record("send_mail", started, reply)
    }
}

fn require_uids(uids: &[u32]) -> AppResult<()> {
    if uids.is_empty() {
        return Err(AppError::invalid("uids must contain at least one UID"));
    }
    Ok(())
}

/// Render a tool result, logging failures
fn finalize(tool: &str, action: &str, started: Instant, result: AppResult<String>) -> ToolReply {
    let reply = match result {
        Ok(text) => ToolReply::ok(text),
        Err(e) => ToolReply::error(format::failure(action, &e)),
    };
    record(tool, started, reply)
}

/// Log timing and outcome of a finished tool call
fn record(tool: &str, started: Instant, reply: ToolReply) -> ToolReply {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if reply.is_error {
        warn!(tool, elapsed_ms, error = %reply.text, "tool failed");
    } else {
        debug!(tool, elapsed_ms, "tool succeeded");
    }
    reply
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tracing_subscriber::fmt::MakeWriter;

    use super::Dispatcher;
    use crate::errors::AppError;
    use crate::fake::{FakeConnector, FakeServer, RecordingSender};
    use crate::transport::MimeNode;

    fn dispatcher(server: &FakeServer, sender: RecordingSender) -> Dispatcher<FakeConnector, RecordingSender> {
        Dispatcher::new(server.session(sender))
    }

    fn args<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).expect("arguments parse")
    }

    #[tokio::test]
    async fn send_with_array_recipient_never_reaches_sender() {
        let server = FakeServer::with_inbox(0);
        let sender = RecordingSender::default();
        let dispatcher = dispatcher(&server, sender.clone());

        for to in [json!(["a@x.com", "b@x.com"]), json!("[a@x.com]")] {
            let reply = dispatcher
                .send_mail(args(json!({ "to": to, "subject": "Hi", "text": "hello" })))
                .await;
            assert!(reply.is_error);
            assert!(reply.text.contains("- to: "), "{}", reply.text);
        }
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn send_without_body_cites_content_rule() {
        let server = FakeServer::with_inbox(0);
        let sender = RecordingSender::default();
        let dispatcher = dispatcher(&server, sender.clone());

        let reply = dispatcher
            .send_mail(args(json!({ "to": "a@x.com", "subject": "Hi" })))
            .await;
        assert!(reply.is_error);
        assert!(reply.text.contains("either text or html body is required"));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn valid_send_reports_message_id() {
        let server = FakeServer::with_inbox(0);
        let sender = RecordingSender::default();
        let dispatcher = dispatcher(&server, sender.clone());

        let reply = dispatcher
            .send_mail(args(json!({ "to": "a@x.com", "subject": "Hi", "html": "<p>x</p>" })))
            .await;
        assert!(!reply.is_error, "{}", reply.text);
        assert!(reply.text.contains("<fake-1@example.com>"));
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(server.connects(), 0);
    }

    /// Shared sink for captured log output
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("log buffer lock")).into_owned()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("log buffer lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn send_mail_outcomes_are_logged_with_timing() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let server = FakeServer::with_inbox(0);
        let dispatcher = dispatcher(&server, RecordingSender::failing("550 relay denied"));

        tracing::subscriber::with_default(subscriber, || {
            futures::executor::block_on(async {
                dispatcher.send_mail(args(json!({ "to": ["a@x.com"] }))).await;
                dispatcher
                    .send_mail(args(json!({ "to": "a@x.com", "subject": "Hi", "text": "x" })))
                    .await;
            })
        });

        let output = logs.contents();
        let failures: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("tool failed") && line.contains("send_mail"))
            .collect();
        assert_eq!(failures.len(), 2, "{output}");
        assert!(failures.iter().all(|line| line.contains("elapsed_ms")));
        assert!(failures[1].contains("550 relay denied"));
    }

    #[tokio::test]
    async fn send_failure_is_a_tool_error() {
        let server = FakeServer::with_inbox(0);
        let dispatcher = dispatcher(&server, RecordingSender::failing("550 relay denied"));

        let reply = dispatcher
            .send_mail(args(json!({ "to": "a@x.com", "subject": "Hi", "text": "x" })))
            .await;
        assert!(reply.is_error);
        assert!(reply.text.contains("550 relay denied"));
    }

    #[tokio::test]
    async fn delete_preview_does_not_mutate() {
        let server = FakeServer::with_inbox(3);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        for extra in [json!({}), json!({ "preview": true }), json!({ "preview": "false" })] {
            let mut call = json!({ "uids": [1, 3] });
            if let (Some(obj), Some(extra)) = (call.as_object_mut(), extra.as_object()) {
                obj.extend(extra.clone());
            }
            let reply = dispatcher.delete_emails(args(call)).await;
            assert!(!reply.is_error);
            assert!(reply.text.contains("2 email(s)"));
            assert!(reply.text.contains("UIDs: 1, 3"));
        }
        assert!(server.log().is_empty());
        assert_eq!(server.uids("INBOX"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn delete_with_preview_false_expunges_given_uids() {
        let server = FakeServer::with_inbox(3);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .delete_emails(args(json!({ "uids": [1, 3], "preview": false })))
            .await;
        assert!(!reply.is_error, "{}", reply.text);
        assert_eq!(
            server.log(),
            vec![
                "SELECT INBOX".to_owned(),
                "STORE 1,3 +FLAGS.SILENT (\\Deleted)".to_owned(),
                "EXPUNGE".to_owned(),
            ]
        );
        assert_eq!(server.uids("INBOX"), vec![2]);
    }

    #[tokio::test]
    async fn empty_uid_lists_are_rejected() {
        let server = FakeServer::with_inbox(1);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .delete_emails(args(json!({ "uids": [], "preview": false })))
            .await;
        assert!(reply.is_error);
        let reply = dispatcher
            .mark_seen(args(json!({ "uids": [] })))
            .await;
        assert!(reply.is_error);
        assert!(server.log().is_empty());
    }

    #[tokio::test]
    async fn move_without_server_support_still_succeeds() {
        let server = FakeServer::with_inbox(2);
        server.add_mailbox("Archive");
        server.disable_move();
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .move_emails(args(json!({ "uids": [2], "destination": "Archive" })))
            .await;
        assert!(!reply.is_error, "{}", reply.text);
        assert!(reply.text.starts_with("Moved 1 email(s) from INBOX to Archive"));
        assert!(server.has_command("COPY 2 Archive"));
        assert_eq!(server.uids("INBOX"), vec![1]);
        assert_eq!(server.mailbox_len("Archive"), 1);
    }

    #[tokio::test]
    async fn list_all_clamps_page_size() {
        let server = FakeServer::with_inbox(150);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .list_all_emails(args(json!({ "page_size": 500 })))
            .await;
        assert!(reply.text.starts_with("Page 1 of 2 (150 email(s) in INBOX, 100 per page)"));
        assert_eq!(reply.text.matches("[UID ").count(), 100);
        assert!(reply.text.contains("[UID 150]"));
        assert!(!reply.text.contains("[UID 50]"));
    }

    #[tokio::test]
    async fn list_all_single_page() {
        let server = FakeServer::with_inbox(30);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .list_all_emails(args(json!({ "page": 1, "page_size": 50 })))
            .await;
        assert!(reply.text.starts_with("Page 1 of 1 (30 email(s) in INBOX, 50 per page)"));
        assert_eq!(reply.text.matches("[UID ").count(), 30);
    }

    #[tokio::test]
    async fn search_applies_limit_after_session() {
        let server = FakeServer::with_inbox(5);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .search_emails(args(json!({ "limit": 2 })))
            .await;
        assert!(reply.text.starts_with("Found 5 email(s) in INBOX, showing the newest 2"));
        assert!(reply.text.contains("[UID 5]"));
        assert!(reply.text.contains("[UID 4]"));
        assert!(!reply.text.contains("[UID 3]"));
        assert!(server.has_command("SEARCH ALL"));
        assert!(server.has_command("FETCH 5,4,3,2,1"));
    }

    #[tokio::test]
    async fn mailbox_listing_is_parent_first() {
        let server = FakeServer::with_inbox(0);
        server.add_mailbox("Archive/2024");
        server.add_mailbox("Archive");
        server.add_mailbox("Archive/2025");
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher.list_mailboxes().await;
        assert_eq!(
            reply.text,
            "Found 4 mailbox(es):\n- INBOX\n- Archive\n- Archive/2024\n- Archive/2025\n"
        );
    }

    #[tokio::test]
    async fn delete_mailbox_refuses_non_empty_folder() {
        let server = FakeServer::with_inbox(1);
        server.add_mailbox("Old");
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .delete_mailbox(args(json!({ "name": "INBOX" })))
            .await;
        assert!(reply.is_error);
        assert!(reply.text.contains("is not empty"));
        assert_eq!(server.count_commands("DELETE"), 0);

        let reply = dispatcher
            .delete_mailbox(args(json!({ "name": "Old" })))
            .await;
        assert!(!reply.is_error, "{}", reply.text);
        assert!(server.has_command("DELETE Old"));
        assert_eq!(server.mailbox_names(), vec!["INBOX".to_owned()]);
    }

    #[tokio::test]
    async fn create_existing_mailbox_reports_server_error() {
        let server = FakeServer::with_inbox(0);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .create_mailbox(args(json!({ "name": "INBOX" })))
            .await;
        assert!(reply.is_error);
        assert!(reply.text.starts_with("Failed to create mailbox: server rejected command:"));
        assert!(reply.text.contains("ALREADYEXISTS"));
    }

    #[tokio::test]
    async fn email_without_date_uses_fetch_time() {
        let server = FakeServer::with_inbox(0);
        let uid = server.add_message(
            "INBOX",
            b"From: a@example.com\r\nSubject: Undated\r\n\r\nhello\r\n",
            MimeNode::leaf("text/plain"),
        );
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let before = chrono::Utc::now();
        let details = dispatcher
            .session()
            .get_email_details("INBOX", uid)
            .await
            .expect("details");
        let after = chrono::Utc::now();
        assert!(details.summary.date >= before - chrono::Duration::seconds(1));
        assert!(details.summary.date <= after);

        let reply = dispatcher
            .get_email(args(json!({ "uid": uid })))
            .await;
        assert!(!reply.is_error, "{}", reply.text);
        assert!(reply.text.contains("Subject: Undated"));
        assert!(reply.text.contains("hello"));
    }

    #[tokio::test]
    async fn missing_email_is_not_found() {
        let server = FakeServer::with_inbox(1);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .get_email(args(json!({ "uid": 77 })))
            .await;
        assert!(reply.is_error);
        assert!(reply.text.contains("not found"));
    }

    #[tokio::test]
    async fn connection_failure_is_rendered_as_text() {
        let server = FakeServer::with_inbox(1);
        server.fail_next(AppError::Connection("connection refused".to_owned()));
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher.list_mailboxes().await;
        assert!(reply.is_error);
        assert_eq!(
            reply.text,
            "Failed to list mailboxes: connection error: connection refused"
        );

        let reply = dispatcher.list_mailboxes().await;
        assert!(!reply.is_error);
    }

    #[tokio::test]
    async fn flag_tools_report_counts() {
        let server = FakeServer::with_inbox(2);
        let dispatcher = dispatcher(&server, RecordingSender::default());

        let reply = dispatcher
            .add_flags(args(json!({ "uids": [1, 2], "flags": ["\\Flagged"] })))
            .await;
        assert_eq!(reply.text, "Added flags \\Flagged to 2 email(s) in INBOX.");
        let reply = dispatcher
            .mark_seen(args(json!({ "uids": [2], "seen": false })))
            .await;
        assert_eq!(reply.text, "Marked 1 email(s) in INBOX as unread.");
        let reply = dispatcher
            .remove_flags(args(json!({ "uids": [1], "flags": ["bad flag"] })))
            .await;
        assert!(reply.is_error);
        assert_eq!(server.flags("INBOX", 1), vec!["\\Flagged".to_owned()]);
    }
}
