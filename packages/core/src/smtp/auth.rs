//! SMTP AUTH: the single configured credential pair and the PLAIN / LOGIN
//! payload decoders.

use std::fmt;
use std::str::FromStr;

use super::reply::SmtpError;

/// Base64 of `Username:` and `Password:`, the LOGIN challenges.
pub const LOGIN_USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
pub const LOGIN_PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        // Evaluate both so timing does not reveal which half was wrong.
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
    Login,
}

impl FromStr for Mechanism {
    type Err = SmtpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Mechanism::Plain),
            "LOGIN" => Ok(Mechanism::Login),
            other => Err(SmtpError::UnsupportedMechanism(other.to_string())),
        }
    }
}

/// Decode a client response line. `*` cancels the exchange.
pub fn decode_response(line: &str) -> Result<String, SmtpError> {
    let line = line.trim();
    if line == "*" {
        return Err(SmtpError::AuthCancelled);
    }
    let bytes = base64::decode(line).map_err(|_| SmtpError::MalformedAuth)?;
    String::from_utf8(bytes).map_err(|_| SmtpError::MalformedAuth)
}

/// Decode a PLAIN response: `authzid \0 authcid \0 password`.
/// The authorization identity is ignored.
pub fn decode_plain(line: &str) -> Result<(String, String), SmtpError> {
    let decoded = decode_response(line)?;
    let mut fields = decoded.split('\0');
    let _authzid = fields.next().ok_or(SmtpError::MalformedAuth)?;
    let username = fields.next().ok_or(SmtpError::MalformedAuth)?;
    let password = fields.next().ok_or(SmtpError::MalformedAuth)?;
    if fields.next().is_some() {
        return Err(SmtpError::MalformedAuth);
    }
    Ok((username.to_string(), password.to_string()))
}
