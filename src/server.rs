//! MCP server implementation with tool handlers
//!
//! Registers the 12 mailbox tools with `rmcp` and forwards each call to the
//! [`Dispatcher`]. Every tool answers with one text block; failures are
//! marked as tool errors rather than protocol errors.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, tool, tool_handler, tool_router};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::format::ToolReply;
use crate::imap::TlsImapConnector;
use crate::models::{
    DeleteEmailsInput, FlagsInput, GetEmailInput, ListAllEmailsInput, MailboxNameInput,
    MarkSeenInput, MoveEmailsInput, SearchEmailsInput, SendMailInput,
};
use crate::session::MailboxSession;
use crate::smtp::SmtpSender;

type LiveDispatcher = Dispatcher<TlsImapConnector, SmtpSender>;

/// Mailbox MCP server
///
/// Cloned per request by `rmcp`; all clones share one dispatcher and thus
/// one IMAP connection.
#[derive(Clone)]
pub struct MailToolsServer {
    dispatcher: Arc<LiveDispatcher>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailToolsServer {
    pub fn new(config: &ServerConfig) -> Self {
        let session = MailboxSession::new(TlsImapConnector::new(config), SmtpSender::new(config));
        Self {
            dispatcher: Arc::new(Dispatcher::new(session)),
            tool_router: Self::tool_router(),
        }
    }

    /// Log out of IMAP if a connection is open
    pub async fn shutdown(&self) {
        let session = self.dispatcher.session();
        if !session.is_connected().await {
            return;
        }
        if let Err(e) = session.disconnect().await {
            tracing::warn!(error = %e, "IMAP logout failed");
        }
    }

    #[tool(
        name = "list_mailboxes",
        description = "List all mailboxes (folders), parents before children"
    )]
    async fn list_mailboxes(&self) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.list_mailboxes().await))
    }

    #[tool(name = "create_mailbox", description = "Create a new mailbox (folder)")]
    async fn create_mailbox(
        &self,
        Parameters(input): Parameters<MailboxNameInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.create_mailbox(input).await))
    }

    #[tool(
        name = "delete_mailbox",
        description = "Delete an empty mailbox (folder). Refuses when the mailbox still contains emails."
    )]
    async fn delete_mailbox(
        &self,
        Parameters(input): Parameters<MailboxNameInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.delete_mailbox(input).await))
    }

    #[tool(
        name = "search_emails",
        description = "Search emails by sender, recipient, subject, body text, unread state and age in days. Newest first; shows up to `limit` results (default 50)."
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.search_emails(input).await))
    }

    #[tool(
        name = "get_email",
        description = "Get the full content of one email by UID: headers, body and attachment list. Reports not found when the UID does not exist."
    )]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.get_email(input).await))
    }

    #[tool(
        name = "list_all_emails",
        description = "List every email in a mailbox page by page, newest first (page_size default 20, max 100)"
    )]
    async fn list_all_emails(
        &self,
        Parameters(input): Parameters<ListAllEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.list_all_emails(input).await))
    }

    #[tool(
        name = "move_emails",
        description = "Move emails to another mailbox"
    )]
    async fn move_emails(
        &self,
        Parameters(input): Parameters<MoveEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.move_emails(input).await))
    }

    #[tool(
        name = "delete_emails",
        description = "Permanently delete emails. Runs as a preview unless `preview` is set to false."
    )]
    async fn delete_emails(
        &self,
        Parameters(input): Parameters<DeleteEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.delete_emails(input).await))
    }

    #[tool(name = "mark_seen", description = "Mark emails as read or unread")]
    async fn mark_seen(
        &self,
        Parameters(input): Parameters<MarkSeenInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.mark_seen(input).await))
    }

    #[tool(
        name = "add_flags",
        description = "Add flags (e.g. \\Flagged, \\Answered, custom keywords) to emails"
    )]
    async fn add_flags(
        &self,
        Parameters(input): Parameters<FlagsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.add_flags(input).await))
    }

    #[tool(name = "remove_flags", description = "Remove flags from emails")]
    async fn remove_flags(
        &self,
        Parameters(input): Parameters<FlagsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.remove_flags(input).await))
    }

    #[tool(
        name = "send_mail",
        description = "Send an email to a single recipient. `to` must be one address string; arrays are rejected. Requires subject and a text or html body."
    )]
    async fn send_mail(
        &self,
        Parameters(input): Parameters<SendMailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(into_result(self.dispatcher.send_mail(input).await))
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailToolsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Mailbox management over IMAP and SMTP. Emails are addressed by mailbox and UID. delete_emails previews unless preview is false; send_mail takes exactly one recipient.",
        )
    }
}

fn into_result(reply: ToolReply) -> CallToolResult {
    let content = vec![Content::text(reply.text)];
    if reply.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}
