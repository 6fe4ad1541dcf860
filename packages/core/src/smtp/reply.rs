//! SMTP replies and the errors that map onto them.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn ok() -> Self {
        Self::new(250, "2.0.0 OK")
    }

    /// Wire form: `250-first`, ..., `250 last`, each CRLF terminated.
    pub fn to_wire(&self) -> String {
        let mut wire = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            wire.push_str(&format!("{}{}{}\r\n", self.code, separator, line));
        }
        if self.lines.is_empty() {
            wire.push_str(&format!("{}\r\n", self.code));
        }
        wire
    }
}

/// Command-level failures. Each one is answered with a rejection reply and
/// the session carries on unless noted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SmtpError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("authentication credentials invalid")]
    InvalidCredentials,

    /// Closes the session.
    #[error("too many failed authentication attempts")]
    TooManyAuthFailures,

    #[error("unsupported authentication mechanism '{0}'")]
    UnsupportedMechanism(String),

    #[error("authentication data could not be decoded")]
    MalformedAuth,

    #[error("authentication cancelled by client")]
    AuthCancelled,

    #[error("bad sequence of commands: {0}")]
    BadSequence(&'static str),

    #[error("syntax error: {0}")]
    Syntax(&'static str),

    #[error("command not recognized")]
    UnknownCommand,

    #[error("command not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("too many recipients")]
    TooManyRecipients,

    #[error("message exceeds maximum size")]
    MessageTooLarge,

    #[error("line too long")]
    LineTooLong,
}

impl SmtpError {
    pub fn reply(&self) -> Reply {
        match self {
            SmtpError::AuthenticationRequired => Reply::new(530, "5.7.0 Authentication required"),
            SmtpError::InvalidCredentials => {
                Reply::new(535, "5.7.8 Authentication credentials invalid")
            }
            SmtpError::TooManyAuthFailures => Reply::new(
                421,
                "4.7.0 Too many failed authentication attempts, closing connection",
            ),
            SmtpError::UnsupportedMechanism(_) => {
                Reply::new(504, "5.5.4 Unrecognized authentication type")
            }
            SmtpError::MalformedAuth => Reply::new(501, "5.5.2 Cannot decode response"),
            SmtpError::AuthCancelled => Reply::new(501, "5.7.0 Authentication cancelled"),
            SmtpError::BadSequence(text) => Reply::new(503, format!("5.5.1 {}", text)),
            SmtpError::Syntax(text) => Reply::new(501, format!("5.5.4 {}", text)),
            SmtpError::UnknownCommand => Reply::new(500, "5.5.2 Error: command not recognized"),
            SmtpError::NotImplemented(text) => Reply::new(502, format!("5.5.1 {}", text)),
            SmtpError::TooManyRecipients => Reply::new(452, "4.5.3 Too many recipients"),
            SmtpError::MessageTooLarge => {
                Reply::new(552, "5.3.4 Message size exceeds fixed maximum message size")
            }
            SmtpError::LineTooLong => Reply::new(500, "5.5.6 Line too long"),
        }
    }
}

/// Failures that end the connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session idle for longer than {0:?}")]
    IdleTimeout(Duration),

    #[error("connection closed before the exchange completed")]
    PrematureEnd,
}
