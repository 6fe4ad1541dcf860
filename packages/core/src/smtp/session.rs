//! One SMTP conversation, from greeting to QUIT.
//!
//! The session is generic over its transport so tests can drive it with
//! in-memory streams. Command lines are capped at [`MAX_COMMAND_LINE`]
//! bytes, DATA at the configured message size, and every read is bounded
//! by the idle timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use crate::config::Config;
use crate::metrics::AppMetrics;
use crate::model::Email;
use crate::store::EmailStore;

use super::auth::{
    decode_plain, decode_response, Credentials, Mechanism, LOGIN_PASSWORD_CHALLENGE,
    LOGIN_USERNAME_CHALLENGE,
};
use super::message::parse_message;
use super::reply::{Reply, SessionError, SmtpError};

pub const MAX_COMMAND_LINE: usize = 4096;
pub const MAX_AUTH_FAILURES: u32 = 3;
pub const MAX_RECIPIENTS: usize = 100;

const DATA_CHUNK: usize = 8192;

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub hostname: String,
    pub credentials: Credentials,
    pub max_message_bytes: usize,
    pub idle_timeout: Duration,
}

impl SmtpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hostname: config.smtp_hostname.clone(),
            credentials: Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ),
            max_message_bytes: config.smtp_max_message_bytes,
            idle_timeout: config.smtp_idle_timeout,
        }
    }
}

/// Everything a session needs from the rest of the process.
#[derive(Clone)]
pub struct SmtpContext {
    pub settings: Arc<SmtpSettings>,
    pub store: Arc<EmailStore>,
    pub metrics: Arc<AppMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Connected,
    Greeted,
    Authenticated,
    Sender { from: String },
    Recipients { from: String, to: Vec<String> },
}

impl State {
    fn is_authenticated(&self) -> bool {
        !matches!(self, State::Connected | State::Greeted)
    }
}

enum Line {
    Text(String),
    TooLong,
    Closed,
}

enum Flow {
    Continue,
    Quit,
}

/// A command either gets rejected with a reply or kills the connection.
enum Failure {
    Reject(SmtpError),
    Fatal(SessionError),
}

impl From<SmtpError> for Failure {
    fn from(err: SmtpError) -> Self {
        Failure::Reject(err)
    }
}

impl From<SessionError> for Failure {
    fn from(err: SessionError) -> Self {
        Failure::Fatal(err)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Failure::Fatal(SessionError::Io(err))
    }
}

pub struct Session<S> {
    stream: BufReader<S>,
    ctx: SmtpContext,
    peer: String,
    state: State,
    auth_failures: u32,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, ctx: SmtpContext) -> Self {
        Self {
            stream: BufReader::new(stream),
            ctx,
            peer: peer.into(),
            state: State::Connected,
            auth_failures: 0,
        }
    }

    /// Drive the conversation until QUIT, disconnect, or a fatal error.
    pub async fn run(mut self) -> Result<(), SessionError> {
        self.ctx.metrics.smtp_sessions_total.inc();
        let greeting = format!("{} ESMTP SMM alert receiver ready", self.ctx.settings.hostname);
        self.send(&Reply::new(220, greeting)).await?;

        loop {
            let line = match self.read_command().await? {
                Line::Text(line) => line,
                Line::TooLong => {
                    self.reject(&SmtpError::LineTooLong).await?;
                    continue;
                }
                Line::Closed => {
                    tracing::debug!(peer = %self.peer, "SMTP client disconnected");
                    return Ok(());
                }
            };

            match self.handle(&line).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => return Ok(()),
                Err(Failure::Reject(err)) => {
                    self.reject(&err).await?;
                    if err == SmtpError::TooManyAuthFailures {
                        return Ok(());
                    }
                }
                Err(Failure::Fatal(err)) => return Err(err),
            }
        }
    }

    async fn handle(&mut self, line: &str) -> Result<Flow, Failure> {
        let (verb, args) = match line.split_once(' ') {
            Some((verb, args)) => (verb.to_ascii_uppercase(), args.trim()),
            None => (line.trim().to_ascii_uppercase(), ""),
        };

        let reply = match verb.as_str() {
            "EHLO" => self.ehlo(args, true)?,
            "HELO" => self.ehlo(args, false)?,
            "AUTH" => self.auth(args).await?,
            "MAIL" => self.mail(args)?,
            "RCPT" => self.rcpt(args)?,
            "DATA" => self.data(args).await?,
            "RSET" => {
                self.reset_transaction();
                Reply::ok()
            }
            "NOOP" => Reply::ok(),
            "VRFY" => Reply::new(
                252,
                "2.5.2 Cannot VRFY user, but will accept message and attempt delivery",
            ),
            "HELP" => Reply::new(
                214,
                "2.0.0 Supported: EHLO HELO AUTH MAIL RCPT DATA RSET NOOP VRFY HELP QUIT",
            ),
            "QUIT" => {
                self.send(&Reply::new(221, "2.0.0 Bye")).await?;
                return Ok(Flow::Quit);
            }
            "STARTTLS" => return Err(SmtpError::NotImplemented("TLS not available").into()),
            _ => return Err(SmtpError::UnknownCommand.into()),
        };

        self.send(&reply).await?;
        Ok(Flow::Continue)
    }

    fn ehlo(&mut self, domain: &str, extended: bool) -> Result<Reply, SmtpError> {
        if domain.is_empty() {
            return Err(SmtpError::Syntax("Error: domain name required"));
        }
        self.state = if self.state.is_authenticated() {
            State::Authenticated
        } else {
            State::Greeted
        };

        let hostname = &self.ctx.settings.hostname;
        if !extended {
            return Ok(Reply::new(250, hostname.clone()));
        }
        Ok(Reply::multiline(
            250,
            vec![
                format!("{} Hello {}", hostname, domain),
                format!("SIZE {}", self.ctx.settings.max_message_bytes),
                "8BITMIME".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
                "ENHANCEDSTATUSCODES".to_string(),
                "HELP".to_string(),
            ],
        ))
    }

    async fn auth(&mut self, args: &str) -> Result<Reply, Failure> {
        match self.state {
            State::Connected => {
                return Err(SmtpError::BadSequence("Error: send HELO/EHLO first").into())
            }
            State::Greeted => {}
            _ => return Err(SmtpError::BadSequence("Error: already authenticated").into()),
        }

        let mut words = args.split_whitespace();
        let mechanism: Mechanism = words
            .next()
            .ok_or(SmtpError::Syntax("Syntax: AUTH mechanism [initial-response]"))?
            .parse()?;
        let initial = words.next();

        let (username, password) = match mechanism {
            Mechanism::Plain => {
                let response = match initial {
                    Some(response) => response.to_string(),
                    None => self.challenge("").await?,
                };
                decode_plain(&response)?
            }
            Mechanism::Login => {
                let username = match initial {
                    Some(response) => decode_response(response)?,
                    None => decode_response(&self.challenge(LOGIN_USERNAME_CHALLENGE).await?)?,
                };
                let password = decode_response(&self.challenge(LOGIN_PASSWORD_CHALLENGE).await?)?;
                (username, password)
            }
        };

        if self.ctx.settings.credentials.verify(&username, &password) {
            tracing::info!(peer = %self.peer, username = %username, "SMTP client authenticated");
            self.state = State::Authenticated;
            return Ok(Reply::new(235, "2.7.0 Authentication successful"));
        }

        self.auth_failures += 1;
        self.ctx.metrics.smtp_auth_failures_total.inc();
        tracing::warn!(
            peer = %self.peer,
            username = %username,
            attempt = self.auth_failures,
            "SMTP authentication failed"
        );
        if self.auth_failures >= MAX_AUTH_FAILURES {
            Err(SmtpError::TooManyAuthFailures.into())
        } else {
            Err(SmtpError::InvalidCredentials.into())
        }
    }

    /// Send a 334 challenge and read the client's response line.
    async fn challenge(&mut self, text: &str) -> Result<String, Failure> {
        self.send(&Reply::new(334, text)).await?;
        match self.read_command().await? {
            Line::Text(line) => Ok(line),
            Line::TooLong => Err(SmtpError::LineTooLong.into()),
            Line::Closed => Err(SessionError::PrematureEnd.into()),
        }
    }

    fn mail(&mut self, args: &str) -> Result<Reply, SmtpError> {
        match self.state {
            State::Connected | State::Greeted => return Err(SmtpError::AuthenticationRequired),
            State::Sender { .. } | State::Recipients { .. } => {
                return Err(SmtpError::BadSequence("Error: nested MAIL command"))
            }
            State::Authenticated => {}
        }

        let (from, params) = parse_path(args, "FROM")
            .ok_or(SmtpError::Syntax("Syntax: MAIL FROM:<address>"))?;
        if !from.is_empty() && !is_mailbox(&from) {
            return Err(SmtpError::Syntax("Error: bad sender address syntax"));
        }
        if let Some(size) = declared_size(params)? {
            if size > self.ctx.settings.max_message_bytes {
                return Err(SmtpError::MessageTooLarge);
            }
        }

        self.state = State::Sender { from };
        Ok(Reply::new(250, "2.1.0 OK"))
    }

    fn rcpt(&mut self, args: &str) -> Result<Reply, SmtpError> {
        match self.state {
            State::Connected | State::Greeted => return Err(SmtpError::AuthenticationRequired),
            State::Authenticated => return Err(SmtpError::BadSequence("Error: need MAIL command")),
            State::Sender { .. } | State::Recipients { .. } => {}
        }

        let (address, _) =
            parse_path(args, "TO").ok_or(SmtpError::Syntax("Syntax: RCPT TO:<address>"))?;
        if !is_mailbox(&address) {
            return Err(SmtpError::Syntax("Error: bad recipient address syntax"));
        }

        match &mut self.state {
            State::Sender { from } => {
                let from = std::mem::take(from);
                self.state = State::Recipients {
                    from,
                    to: vec![address],
                };
            }
            State::Recipients { to, .. } => {
                if !to.contains(&address) {
                    if to.len() >= MAX_RECIPIENTS {
                        return Err(SmtpError::TooManyRecipients);
                    }
                    to.push(address);
                }
            }
            _ => {}
        }
        Ok(Reply::new(250, "2.1.5 OK"))
    }

    async fn data(&mut self, args: &str) -> Result<Reply, Failure> {
        let (from, to) = match &self.state {
            State::Connected | State::Greeted => {
                return Err(SmtpError::AuthenticationRequired.into())
            }
            State::Authenticated => {
                return Err(SmtpError::BadSequence("Error: need MAIL command").into())
            }
            State::Sender { .. } => {
                return Err(SmtpError::BadSequence("Error: need RCPT command").into())
            }
            State::Recipients { from, to } => (from.clone(), to.clone()),
        };
        if !args.is_empty() {
            return Err(SmtpError::Syntax("Syntax: DATA").into());
        }

        self.send(&Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
            .await?;
        let payload = self.read_data().await?;
        self.state = State::Authenticated;

        let Some(raw) = payload else {
            tracing::warn!(
                peer = %self.peer,
                limit = self.ctx.settings.max_message_bytes,
                "SMTP message rejected: too large"
            );
            return Err(SmtpError::MessageTooLarge.into());
        };

        let parsed = parse_message(&raw);
        let email = Email {
            from_address: from,
            from_header: parsed.from,
            to_addresses: to,
            subject: parsed.subject,
            body: parsed.body,
            raw_size: raw.len(),
            headers: parsed.headers,
            peer_address: self.peer.clone(),
        };
        let subject = email.subject.clone();
        let id = self.ctx.store.insert(email).await;

        self.ctx.metrics.emails_received_total.inc();
        tracing::info!(
            id,
            peer = %self.peer,
            subject = %subject,
            size = raw.len(),
            "Email received and stored"
        );
        Ok(Reply::new(250, "2.0.0 Message accepted for delivery"))
    }

    fn reset_transaction(&mut self) {
        if self.state.is_authenticated() {
            self.state = State::Authenticated;
        }
    }

    /// Read DATA up to the lone-dot terminator, undoing dot-stuffing.
    /// `None` means the payload exceeded the size limit and was discarded.
    async fn read_data(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let limit = self.ctx.settings.max_message_bytes;
        let mut message = Vec::new();
        let mut chunk = Vec::with_capacity(DATA_CHUNK);
        let mut at_line_start = true;
        let mut overflowed = false;

        loop {
            chunk.clear();
            if self.read_bounded(&mut chunk, DATA_CHUNK).await? == 0 {
                tracing::warn!(peer = %self.peer, "Connection closed during DATA");
                return Err(SessionError::PrematureEnd);
            }
            let line_complete = chunk.ends_with(b"\n");

            if at_line_start {
                if line_complete && (chunk == b".\r\n" || chunk == b".\n") {
                    break;
                }
                if chunk.starts_with(b".") {
                    chunk.remove(0);
                }
            }
            at_line_start = line_complete;

            if overflowed {
                continue;
            }
            if message.len() + chunk.len() > limit {
                overflowed = true;
                message = Vec::new();
            } else {
                message.extend_from_slice(&chunk);
            }
        }

        Ok((!overflowed).then_some(message))
    }

    async fn read_command(&mut self) -> Result<Line, SessionError> {
        let mut buf = Vec::new();
        let read = self.read_bounded(&mut buf, MAX_COMMAND_LINE).await?;
        if read == 0 {
            return Ok(Line::Closed);
        }
        if !buf.ends_with(b"\n") && read >= MAX_COMMAND_LINE {
            let mut rest = Vec::new();
            loop {
                rest.clear();
                let read = self.read_bounded(&mut rest, MAX_COMMAND_LINE).await?;
                if read == 0 || rest.ends_with(b"\n") {
                    break;
                }
            }
            return Ok(Line::TooLong);
        }

        let text = String::from_utf8_lossy(&buf);
        Ok(Line::Text(text.trim_end_matches(&['\r', '\n'][..]).to_string()))
    }

    /// Read up to `limit` bytes or through the next LF, whichever is first.
    async fn read_bounded(&mut self, buf: &mut Vec<u8>, limit: usize) -> Result<usize, SessionError> {
        let idle = self.ctx.settings.idle_timeout;
        let mut limited = (&mut self.stream).take(limit as u64);
        let outcome = timeout(idle, limited.read_until(b'\n', buf)).await;

        match outcome {
            Ok(read) => Ok(read?),
            Err(_) => {
                tracing::info!(peer = %self.peer, ?idle, "Closing idle SMTP session");
                let reply = Reply::new(
                    421,
                    format!("4.4.2 {} Error: timeout exceeded", self.ctx.settings.hostname),
                );
                self.send(&reply).await?;
                Err(SessionError::IdleTimeout(idle))
            }
        }
    }

    async fn reject(&mut self, err: &SmtpError) -> Result<(), SessionError> {
        let reply = err.reply();
        tracing::debug!(peer = %self.peer, code = reply.code, "SMTP command rejected: {}", err);
        self.ctx
            .metrics
            .smtp_rejections_total
            .with_label_values(&[&reply.code.to_string()])
            .inc();
        self.send(&reply).await
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        self.stream.write_all(reply.to_wire().as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Parse `FROM:<addr> params` / `TO:<addr> params`. Brackets are optional.
fn parse_path<'a>(args: &'a str, keyword: &str) -> Option<(String, &'a str)> {
    let (word, rest) = args.split_once(':')?;
    if !word.trim().eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = rest.trim_start();
    if let Some(inner) = rest.strip_prefix('<') {
        let (address, params) = inner.split_once('>')?;
        return Some((address.trim().to_string(), params.trim()));
    }
    let (address, params) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if address.is_empty() {
        return None;
    }
    Some((address.to_string(), params.trim()))
}

fn is_mailbox(address: &str) -> bool {
    if address.eq_ignore_ascii_case("postmaster") {
        return true;
    }
    if address.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
        return false;
    }
    match address.rsplit_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// Value of a `SIZE=` ESMTP parameter, if present.
fn declared_size(params: &str) -> Result<Option<usize>, SmtpError> {
    for param in params.split_whitespace() {
        if let Some((key, value)) = param.split_once('=') {
            if key.eq_ignore_ascii_case("SIZE") {
                return value
                    .parse()
                    .map(Some)
                    .map_err(|_| SmtpError::Syntax("Error: invalid SIZE parameter"));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EmailFilter;
    use crate::store::Page;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    // "\0admin\0secret"
    const PLAIN_OK: &str = "AGFkbWluAHNlY3JldA==";
    // "\0admin\0wrong"
    const PLAIN_WRONG: &str = "AGFkbWluAHdyb25n";

    fn make_context(max_message_bytes: usize) -> SmtpContext {
        SmtpContext {
            settings: Arc::new(SmtpSettings {
                hostname: "mx.test".to_string(),
                credentials: Credentials::new("admin", "secret"),
                max_message_bytes,
                idle_timeout: Duration::from_secs(30),
            }),
            store: Arc::new(EmailStore::new(10)),
            metrics: Arc::new(AppMetrics::new().unwrap()),
        }
    }

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
        task: JoinHandle<Result<(), SessionError>>,
    }

    impl Client {
        async fn connect(ctx: SmtpContext) -> Self {
            let (client, server) = duplex(64 * 1024);
            let task = tokio::spawn(Session::new(server, "127.0.0.1:50000", ctx).run());
            let (read, write) = tokio::io::split(client);
            let mut client = Self {
                reader: BufReader::new(read),
                writer: write,
                task,
            };
            assert!(client.reply().await.starts_with("220 mx.test"));
            client
        }

        /// Read one full (possibly multi-line) reply.
        async fn reply(&mut self) -> String {
            let mut full = String::new();
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).await.unwrap();
                assert!(!line.is_empty(), "server closed the connection");
                full.push_str(&line);
                if line.as_bytes().get(3) != Some(&b'-') {
                    return full;
                }
            }
        }

        async fn send(&mut self, line: &str) -> String {
            self.writer
                .write_all(format!("{}\r\n", line).as_bytes())
                .await
                .unwrap();
            self.reply().await
        }

        async fn login(&mut self) {
            self.send("EHLO client.test").await;
            assert!(self.send(&format!("AUTH PLAIN {}", PLAIN_OK)).await.starts_with("235"));
        }
    }

    #[tokio::test]
    async fn full_session_stores_one_email() {
        let ctx = make_context(1024 * 1024);
        let store = ctx.store.clone();
        let mut client = Client::connect(ctx).await;

        let ehlo = client.send("EHLO client.test").await;
        assert!(ehlo.contains("250-AUTH PLAIN LOGIN"));
        assert!(ehlo.contains("250 HELP"));
        assert!(client.send(&format!("AUTH PLAIN {}", PLAIN_OK)).await.starts_with("235"));
        assert!(client.send("MAIL FROM:<smm@example.com>").await.starts_with("250"));
        assert!(client.send("RCPT TO:<ops@example.com>").await.starts_with("250"));
        assert!(client.send("DATA").await.starts_with("354"));
        let accepted = client
            .send("From: SMM <smm@example.com>\r\nSubject: Test\r\n\r\nHello\r\n.")
            .await;
        assert_eq!(accepted, "250 2.0.0 Message accepted for delivery\r\n");
        assert!(client.send("QUIT").await.starts_with("221"));
        client.task.await.unwrap().unwrap();

        let listing = store.list(&EmailFilter::default(), Page::default()).await;
        assert_eq!(listing.total, 1);
        let email = &listing.records[0];
        assert_eq!(email.record.from_address, "smm@example.com");
        assert_eq!(email.record.to_addresses, vec!["ops@example.com"]);
        assert_eq!(email.record.subject, "Test");
        assert_eq!(email.record.body, "Hello");
        assert_eq!(email.record.from_header.as_deref(), Some("SMM <smm@example.com>"));
        assert_eq!(email.record.peer_address, "127.0.0.1:50000");
    }

    #[tokio::test]
    async fn mail_before_auth_is_refused() {
        let ctx = make_context(1024);
        let store = ctx.store.clone();
        let mut client = Client::connect(ctx).await;

        assert!(client.send("MAIL FROM:<a@b.c>").await.starts_with("530 5.7.0"));
        client.send("EHLO client.test").await;
        assert!(client.send("MAIL FROM:<a@b.c>").await.starts_with("530 5.7.0"));
        assert!(client.send("DATA").await.starts_with("530"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn auth_before_ehlo_is_a_sequence_error() {
        let mut client = Client::connect(make_context(1024)).await;
        assert!(client
            .send(&format!("AUTH PLAIN {}", PLAIN_OK))
            .await
            .starts_with("503"));
    }

    #[tokio::test]
    async fn wrong_password_can_be_retried() {
        let ctx = make_context(1024);
        let metrics = ctx.metrics.clone();
        let mut client = Client::connect(ctx).await;
        client.send("EHLO client.test").await;

        assert!(client
            .send(&format!("AUTH PLAIN {}", PLAIN_WRONG))
            .await
            .starts_with("535 5.7.8"));
        assert!(client
            .send(&format!("AUTH PLAIN {}", PLAIN_OK))
            .await
            .starts_with("235"));
        assert!(client
            .send(&format!("AUTH PLAIN {}", PLAIN_OK))
            .await
            .starts_with("503"));
        assert!((metrics.smtp_auth_failures_total.get() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn third_auth_failure_closes_the_session() {
        let mut client = Client::connect(make_context(1024)).await;
        client.send("EHLO client.test").await;

        for _ in 0..2 {
            let reply = client.send(&format!("AUTH PLAIN {}", PLAIN_WRONG)).await;
            assert!(reply.starts_with("535"));
        }
        let last = client.send(&format!("AUTH PLAIN {}", PLAIN_WRONG)).await;
        assert!(last.starts_with("421"));
        client.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn auth_login_uses_challenges() {
        let mut client = Client::connect(make_context(1024)).await;
        client.send("EHLO client.test").await;

        assert_eq!(client.send("AUTH LOGIN").await, "334 VXNlcm5hbWU6\r\n");
        assert_eq!(client.send("YWRtaW4=").await, "334 UGFzc3dvcmQ6\r\n");
        assert!(client.send("c2VjcmV0").await.starts_with("235"));
    }

    #[tokio::test]
    async fn auth_plain_without_initial_response_prompts() {
        let mut client = Client::connect(make_context(1024)).await;
        client.send("EHLO client.test").await;

        assert_eq!(client.send("AUTH PLAIN").await, "334 \r\n");
        assert!(client.send(PLAIN_OK).await.starts_with("235"));
    }

    #[tokio::test]
    async fn unsupported_mechanism_is_rejected() {
        let mut client = Client::connect(make_context(1024)).await;
        client.send("EHLO client.test").await;
        assert!(client.send("AUTH CRAM-MD5").await.starts_with("504"));
    }

    #[tokio::test]
    async fn out_of_order_commands_get_503() {
        let mut client = Client::connect(make_context(1024)).await;
        client.login().await;

        assert!(client.send("RCPT TO:<ops@example.com>").await.starts_with("503"));
        assert!(client.send("DATA").await.starts_with("503"));
        assert!(client.send("MAIL FROM:<a@b.c>").await.starts_with("250"));
        assert!(client.send("MAIL FROM:<a@b.c>").await.starts_with("503"));
        assert!(client.send("DATA").await.starts_with("503"));
        assert!(client.send("RSET").await.starts_with("250"));
        assert!(client.send("RCPT TO:<ops@example.com>").await.starts_with("503"));
    }

    #[tokio::test]
    async fn malformed_addresses_get_501() {
        let mut client = Client::connect(make_context(1024)).await;
        client.login().await;

        assert!(client.send("MAIL FROM smm@example.com").await.starts_with("501"));
        assert!(client.send("MAIL FROM:<not an address>").await.starts_with("501"));
        assert!(client.send("MAIL FROM:<>").await.starts_with("250"));
        assert!(client.send("RCPT TO:<>").await.starts_with("501"));
    }

    #[tokio::test]
    async fn declared_size_over_limit_gets_552() {
        let mut client = Client::connect(make_context(100)).await;
        client.login().await;
        assert!(client
            .send("MAIL FROM:<a@b.c> SIZE=1000")
            .await
            .starts_with("552"));
        assert!(client.send("MAIL FROM:<a@b.c> SIZE=50").await.starts_with("250"));
    }

    #[tokio::test]
    async fn oversized_data_is_consumed_and_rejected() {
        let ctx = make_context(64);
        let store = ctx.store.clone();
        let mut client = Client::connect(ctx).await;
        client.login().await;
        client.send("MAIL FROM:<a@b.c>").await;
        client.send("RCPT TO:<ops@example.com>").await;
        client.send("DATA").await;

        let big = "x".repeat(200);
        let reply = client.send(&format!("Subject: big\r\n\r\n{}\r\n.", big)).await;
        assert!(reply.starts_with("552"));
        assert!(store.is_empty());

        // Session is usable again afterwards.
        assert!(client.send("MAIL FROM:<a@b.c>").await.starts_with("250"));
    }

    #[tokio::test]
    async fn dot_stuffed_lines_are_unstuffed() {
        let ctx = make_context(1024);
        let store = ctx.store.clone();
        let mut client = Client::connect(ctx).await;
        client.login().await;
        client.send("MAIL FROM:<a@b.c>").await;
        client.send("RCPT TO:<ops@example.com>").await;
        client.send("DATA").await;
        client
            .send("Subject: dots\r\n\r\n..leading dot\r\n.")
            .await;

        let listing = store.list(&EmailFilter::default(), Page::default()).await;
        assert_eq!(listing.records[0].record.body, ".leading dot");
    }

    #[tokio::test]
    async fn duplicate_recipients_are_collapsed() {
        let ctx = make_context(1024);
        let store = ctx.store.clone();
        let mut client = Client::connect(ctx).await;
        client.login().await;
        client.send("MAIL FROM:<a@b.c>").await;
        client.send("RCPT TO:<ops@example.com>").await;
        client.send("RCPT TO:<ops@example.com>").await;
        client.send("RCPT TO:<dev@example.com>").await;
        client.send("DATA").await;
        client.send("Subject: x\r\n\r\nbody\r\n.").await;

        let listing = store.list(&EmailFilter::default(), Page::default()).await;
        assert_eq!(
            listing.records[0].record.to_addresses,
            vec!["ops@example.com", "dev@example.com"]
        );
    }

    #[tokio::test]
    async fn misc_commands_reply_as_expected() {
        let mut client = Client::connect(make_context(1024)).await;
        assert!(client.send("NOOP").await.starts_with("250"));
        assert!(client.send("VRFY admin").await.starts_with("252"));
        assert!(client.send("HELP").await.starts_with("214"));
        assert!(client.send("STARTTLS").await.starts_with("502"));
        assert!(client.send("BOGUS").await.starts_with("500"));
        assert_eq!(client.send("HELO client.test").await, "250 mx.test\r\n");
    }

    #[tokio::test]
    async fn overlong_command_line_is_rejected() {
        let mut client = Client::connect(make_context(1024)).await;
        let long = format!("NOOP {}", "a".repeat(MAX_COMMAND_LINE * 2));
        assert!(client.send(&long).await.starts_with("500"));
        assert!(client.send("NOOP").await.starts_with("250"));
    }

    #[tokio::test]
    async fn disconnect_during_data_stores_nothing() {
        let ctx = make_context(1024);
        let store = ctx.store.clone();
        let mut client = Client::connect(ctx).await;
        client.login().await;
        client.send("MAIL FROM:<a@b.c>").await;
        client.send("RCPT TO:<ops@example.com>").await;
        client.send("DATA").await;
        client
            .writer
            .write_all(b"Subject: cut\r\n\r\npartial")
            .await
            .unwrap();
        client.writer.shutdown().await.unwrap();

        let result = client.task.await.unwrap();
        assert!(matches!(result, Err(SessionError::PrematureEnd)));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_closed_with_421() {
        let mut client = Client::connect(make_context(1024)).await;
        let reply = client.reply().await;
        assert!(reply.starts_with("421"));

        let result = client.task.await.unwrap();
        assert!(matches!(result, Err(SessionError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn exact_transcript_for_quit() {
        let stream = tokio_test::io::Builder::new()
            .write(b"220 mx.test ESMTP SMM alert receiver ready\r\n")
            .read(b"NOOP\r\n")
            .write(b"250 2.0.0 OK\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 2.0.0 Bye\r\n")
            .build();
        Session::new(stream, "mock", make_context(1024))
            .run()
            .await
            .unwrap();
    }

    #[test]
    fn path_parsing_accepts_common_forms() {
        assert_eq!(
            parse_path("FROM:<a@b.c> SIZE=10", "FROM"),
            Some(("a@b.c".to_string(), "SIZE=10"))
        );
        assert_eq!(
            parse_path("from: a@b.c", "FROM"),
            Some(("a@b.c".to_string(), ""))
        );
        assert_eq!(parse_path("TO:<a@b.c>", "FROM"), None);
        assert_eq!(parse_path("FROM:<a@b.c", "FROM"), None);
    }

    #[test]
    fn size_parameter_must_be_numeric() {
        assert_eq!(declared_size("SIZE=123 BODY=8BITMIME"), Ok(Some(123)));
        assert_eq!(declared_size("BODY=8BITMIME"), Ok(None));
        assert!(declared_size("SIZE=lots").is_err());
    }
}
