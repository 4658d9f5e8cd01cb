//! Configuration for the IMAP and SMTP endpoints
//!
//! All configuration is loaded from environment variables prefixed with
//! `MAIL_IMAP_`, `MAIL_SMTP_` or `MAIL_`. The result is an explicit value that
//! is handed to the mailbox session; nothing reads the environment later.

use std::env;
use std::env::VarError;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Connection details for one mail protocol endpoint
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// Implicit TLS when true, `STARTTLS` upgrade when false
    pub secure: bool,
    /// Username for authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
}

/// Server-wide configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IMAP endpoint used for retrieval and organization
    pub imap: EndpointConfig,
    /// SMTP endpoint used for sending
    pub smtp: EndpointConfig,
    /// Address placed in the `From` header of outgoing mail
    pub from_address: String,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_IMAP_HOST=imap.gmail.com
    /// MAIL_IMAP_USER=user@gmail.com
    /// MAIL_IMAP_PASS=app-password
    /// MAIL_SMTP_HOST=smtp.gmail.com
    /// MAIL_SMTP_PORT=465
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Self::load_with(|key| env::var(key))
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// SMTP credentials default to the IMAP ones and `MAIL_FROM` defaults to
    /// the SMTP user. Ports default to 993/465 with implicit TLS and to
    /// 143/587 when `STARTTLS` is selected.
    pub fn load_with<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let imap_user = required(&lookup, "MAIL_IMAP_USER")?;
        let imap_pass = required(&lookup, "MAIL_IMAP_PASS")?;
        let imap_secure = parse_bool(&lookup, "MAIL_IMAP_SECURE", true)?;
        let imap = EndpointConfig {
            host: required(&lookup, "MAIL_IMAP_HOST")?,
            port: parse_u16(&lookup, "MAIL_IMAP_PORT", if imap_secure { 993 } else { 143 })?,
            secure: imap_secure,
            user: imap_user.clone(),
            pass: SecretString::new(imap_pass.clone().into()),
        };

        let smtp_user = optional(&lookup, "MAIL_SMTP_USER")?.unwrap_or(imap_user);
        let smtp_pass = optional(&lookup, "MAIL_SMTP_PASS")?.unwrap_or(imap_pass);
        let smtp_secure = parse_bool(&lookup, "MAIL_SMTP_SECURE", true)?;
        let smtp = EndpointConfig {
            host: required(&lookup, "MAIL_SMTP_HOST")?,
            port: parse_u16(&lookup, "MAIL_SMTP_PORT", if smtp_secure { 465 } else { 587 })?,
            secure: smtp_secure,
            user: smtp_user.clone(),
            pass: SecretString::new(smtp_pass.into()),
        };

        Ok(Self {
            imap,
            smtp,
            from_address: optional(&lookup, "MAIL_FROM")?.unwrap_or(smtp_user),
            connect_timeout_ms: parse_u64(&lookup, "MAIL_IMAP_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: parse_u64(&lookup, "MAIL_IMAP_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: parse_u64(&lookup, "MAIL_IMAP_SOCKET_TIMEOUT_MS", 300_000)?,
        })
    }
}

/// Read a required variable, returning error if missing or empty
fn required<F>(lookup: &F, key: &str) -> AppResult<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    optional(lookup, key)?.ok_or_else(|| {
        AppError::InvalidInput(format!("missing required environment variable {key}"))
    })
}

/// Read an optional variable; blank values count as unset
fn optional<F>(lookup: &F, key: &str) -> AppResult<Option<String>>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(key) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a boolean variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> AppResult<bool>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(lookup, key)? {
        Some(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u16<F>(lookup: &F, key: &str, default: u16) -> AppResult<u16>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(lookup, key)? {
        Some(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> AppResult<u64>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(lookup, key)? {
        Some(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}
