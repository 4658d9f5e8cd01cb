//! mail-tools-mcp: mailbox management MCP server over stdio
//!
//! Exposes IMAP folder, search, move, delete and flag operations plus SMTP
//! sending as Model Context Protocol tools. One IMAP connection is opened
//! lazily and shared by all tool calls.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Environment-driven IMAP/SMTP endpoint configuration
//! - [`errors`]: Application error model
//! - [`transport`]: Traits between the session and the wire clients
//! - [`imap`]: `async-imap` connection with TLS and timeout wrappers
//! - [`smtp`]: `lettre` message building and submission
//! - [`session`]: Mailbox session over a single guarded IMAP connection
//! - [`search`]: Search filters to IMAP `SEARCH` keys
//! - [`folders`]: Mailbox hierarchy flattening
//! - [`mime`]: Message parsing, body extraction and sanitization
//! - [`models`]: Domain objects and schema-bearing tool inputs
//! - [`validation`]: Exhaustive `send_mail` argument checks
//! - [`pagination`]: Client-side page slicing
//! - [`format`]: Text rendering of tool results
//! - [`dispatcher`]: Tool policies and error-to-text conversion
//! - [`server`]: MCP tool registration

mod config;
mod dispatcher;
mod errors;
#[cfg(test)]
mod fake;
mod folders;
mod format;
mod imap;
mod mime;
mod models;
mod pagination;
mod search;
mod server;
mod session;
mod smtp;
mod transport;
mod validation;

use std::path::PathBuf;

use clap::Parser;
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line options
#[derive(Debug, Parser)]
#[command(version, about = "Mailbox management MCP server over stdio")]
struct Cli {
    /// Load environment variables from this file instead of `./.env`
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

/// Application entry point
///
/// Loads `.env`, initializes tracing on stderr (stdout carries MCP), reads
/// the configuration and serves over stdio until the client disconnects.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_IMAP_HOST=imap.example.com \
/// MAIL_IMAP_USER=user@example.com \
/// MAIL_IMAP_PASS=secret \
/// MAIL_SMTP_HOST=smtp.example.com \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;
    info!(
        imap_host = %config.imap.host,
        smtp_host = %config.smtp.host,
        "starting mail tools server"
    );
    let server = server::MailToolsServer::new(&config);
    let service = server.clone().serve(stdio()).await?;
    service.waiting().await?;
    server.shutdown().await;
    Ok(())
}
