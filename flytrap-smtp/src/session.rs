use std::{net::SocketAddr, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use flytrap_common::{address::parse_mailbox, envelope::Envelope, status::Status};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_rustls::server::TlsStream;
use tracing::{error, info, trace, warn};

use crate::{
    command::Command,
    connection::Connection,
    error::ConnectionError,
    state::SequenceState,
};

/// Sessions terminate after this many consecutive client-induced protocol
/// errors (syntax, bad sequence, unparseable address). Any accepted command
/// resets the counter.
const MAX_CONSECUTIVE_ERRORS: u8 = 5;

/// Message size advertised in the EHLO SIZE extension. The honeypot never
/// enforces it; the advertisement just keeps the disguise plausible.
const ADVERTISED_SIZE: usize = 10_485_760;

#[derive(Clone, Debug)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_name: String,
    pub tls_context: Option<TlsContext>,
    pub read_timeout: Duration,
}

impl SessionConfig {
    /// Create a new `SessionConfig` builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for `SessionConfig`
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    server_name: String,
    tls_context: Option<TlsContext>,
    read_timeout: Option<Duration>,
}

impl SessionConfigBuilder {
    /// Set the name announced in the greeting and HELO/EHLO replies
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the TLS context for STARTTLS support
    #[must_use]
    pub fn with_tls_context(mut self, tls_context: Option<TlsContext>) -> Self {
        self.tls_context = tls_context;
        self
    }

    /// Set the per-command read deadline
    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    /// Build the final `SessionConfig`
    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            server_name: if self.server_name.is_empty() {
                "localhost".to_string()
            } else {
                self.server_name
            },
            tls_context: self.tls_context,
            read_timeout: self.read_timeout.unwrap_or(Duration::from_secs(240)),
        }
    }
}

/// What the command loop should do after a command has been answered.
enum Flow {
    Continue,
    Quit,
    /// The error budget is spent; the last reply was the closing one.
    Terminate,
}

/// Per-connection protocol driver.
///
/// Owns the socket, the sequence state, and the envelope under
/// construction; nothing here is shared, so the whole session is a
/// sequential state machine.
pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    peer: SocketAddr,
    connection: Connection<Stream>,
    config: SessionConfig,
    state: SequenceState,
    helo_seen: bool,
    error_count: u8,
    opened_at: DateTime<Utc>,
    envelope: Envelope,
    ingest: mpsc::Sender<Envelope>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        config: SessionConfig,
        ingest: mpsc::Sender<Envelope>,
    ) -> Self {
        Self::with_connection(Connection::plain(stream), peer, config, ingest)
    }

    /// A session on the implicit-TLS port: the handshake already happened,
    /// so MAIL FROM marks envelopes as securely delivered from the start.
    pub fn create_tls(
        stream: TlsStream<Stream>,
        peer: SocketAddr,
        config: SessionConfig,
        ingest: mpsc::Sender<Envelope>,
    ) -> Self {
        Self::with_connection(Connection::tls(stream), peer, config, ingest)
    }

    fn with_connection(
        connection: Connection<Stream>,
        peer: SocketAddr,
        config: SessionConfig,
        ingest: mpsc::Sender<Envelope>,
    ) -> Self {
        let opened_at = Utc::now();
        let envelope = Envelope::new(peer.to_string(), opened_at);

        Self {
            peer,
            connection,
            config,
            state: SequenceState::default(),
            helo_seen: false,
            error_count: 0,
            opened_at,
            envelope,
            ingest,
        }
    }

    /// Drive the SMTP dialogue until QUIT, the error budget, or a transport
    /// error ends it.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Connected: {}", self.peer);

        let greeting = format!(
            "{} {} ESMTP",
            Status::ServiceReady,
            self.config.server_name
        );
        trace!("{}: {greeting}", self.peer);
        self.connection.send(&greeting).await?;

        loop {
            let Some(line) = self.read_wire_line().await? else {
                info!("Client {} disconnected", self.peer);
                return Ok(());
            };

            let command = match Command::try_from(trim_line_ending(&line)) {
                Ok(command) => command,
                Err(invalid) => {
                    info!("{}: {invalid}", self.peer);
                    self.reply(Status::SyntaxError, "Syntax error, command unrecognized")
                        .await?;
                    if self.protocol_error_exhausted() {
                        info!("Error budget spent for {}", self.peer);
                        return Ok(());
                    }
                    continue;
                }
            };

            info!("{}: {command}", self.peer);

            // Sequence rejection leaves both state and envelope untouched.
            if !self.state.permits(&command) {
                self.reply(Status::InvalidCommandSequence, "Bad command sequence")
                    .await?;
                if self.protocol_error_exhausted() {
                    info!("Error budget spent for {}", self.peer);
                    return Ok(());
                }
                continue;
            }

            // STARTTLS is handled here rather than in `handle` because the
            // upgrade consumes the connection.
            if matches!(command, Command::StartTls) {
                if self.connection.is_tls() {
                    self.reply(Status::InvalidCommandSequence, "Bad command sequence")
                        .await?;
                    if self.protocol_error_exhausted() {
                        return Ok(());
                    }
                    continue;
                }

                let Some(tls_context) = self.config.tls_context.clone() else {
                    self.reply(Status::NotImplemented, "Not implemented").await?;
                    continue;
                };

                self.reply(Status::ServiceReady, "Ready to start TLS").await?;

                let connection = self.connection;
                match connection.upgrade(&tls_context).await {
                    Ok(upgraded) => {
                        info!("Session {} upgraded to TLS", self.peer);
                        self.connection = upgraded;
                        // The client has to introduce itself again on the
                        // encrypted channel.
                        self.state = SequenceState::Greeted;
                        self.error_count = 0;
                    }
                    Err(err) => {
                        warn!("TLS handshake with {} failed: {err}", self.peer);
                        return Ok(());
                    }
                }
                continue;
            }

            match self.handle(command).await? {
                Flow::Continue => {}
                Flow::Quit | Flow::Terminate => return Ok(()),
            }
        }
    }

    async fn handle(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Helo(domain) => {
                self.verify_host(&domain);
                let text = format!("{} Hello {}", self.config.server_name, self.peer);
                self.reply(Status::Ok, &text).await?;
                self.state = SequenceState::HeloOk;
                self.helo_seen = true;
                self.error_count = 0;
            }

            Command::Ehlo(domain) => {
                self.verify_host(&domain);
                let lines = self.ehlo_lines();
                self.reply_multiline(Status::Ok, &lines).await?;
                self.state = SequenceState::HeloOk;
                self.helo_seen = true;
                self.error_count = 0;
            }

            Command::MailFrom(argument) => match parse_mailbox(&argument) {
                Ok(sender) => {
                    self.envelope.set_sender(sender, self.connection.is_tls());
                    self.reply(Status::Ok, "OK").await?;
                    self.state = SequenceState::FromOk;
                    self.error_count = 0;
                }
                Err(err) => {
                    info!("Bad FROM address from {}: {err}", self.peer);
                    self.reply(Status::RequestAborted, "Requested action aborted")
                        .await?;
                    if self.protocol_error_exhausted() {
                        return Ok(Flow::Terminate);
                    }
                }
            },

            Command::RcptTo(argument) => match parse_mailbox(&argument) {
                Ok(recipient) => {
                    self.envelope.add_recipient(recipient);
                    self.reply(Status::Ok, "OK").await?;
                    self.state = SequenceState::RcptOk;
                    self.error_count = 0;
                }
                Err(err) => {
                    info!("Bad TO address from {}: {err}", self.peer);
                    self.reply(Status::RequestAborted, "Requested action aborted")
                        .await?;
                    if self.protocol_error_exhausted() {
                        return Ok(Flow::Terminate);
                    }
                }
            },

            Command::Data => {
                self.reply(
                    Status::StartMailInput,
                    "Start mail input; end with <CRLF>.<CRLF>",
                )
                .await?;
                self.state = SequenceState::DataMode;

                let body = self.read_dot_body().await?;

                self.envelope.seal(body);
                self.state = SequenceState::PostData;
                self.error_count = 0;

                let queued = format!("OK: queued as {}", self.envelope.id());
                self.reply(Status::Ok, &queued).await?;

                // The sealed envelope moves into the pipeline; a fresh one
                // takes its place in case the session continues. The send
                // blocks while the pipeline is saturated, which is exactly
                // the backpressure the client should feel.
                let sealed = std::mem::replace(
                    &mut self.envelope,
                    Envelope::new(self.peer.to_string(), self.opened_at),
                );
                if self.ingest.send(sealed).await.is_err() {
                    error!("Ingest stage is closed; envelope from {} dropped", self.peer);
                }
            }

            Command::Rset => {
                self.envelope = Envelope::new(self.peer.to_string(), self.opened_at);
                self.state = if self.helo_seen {
                    SequenceState::HeloOk
                } else {
                    SequenceState::Greeted
                };
                self.reply(Status::Ok, "OK").await?;
                self.error_count = 0;
            }

            Command::Noop => {
                self.reply(Status::Ok, "OK").await?;
                self.error_count = 0;
            }

            Command::Help => {
                let lines = [
                    "SMTP servers help those who help themselves.".to_string(),
                    "Go read http://cr.yp.to/smtp.html.".to_string(),
                ];
                self.reply_multiline(Status::HelpMessage, &lines).await?;
                self.error_count = 0;
            }

            Command::Vrfy(_) => {
                self.reply(Status::CannotVerify, "Cannot VRFY").await?;
                self.error_count = 0;
            }

            Command::Expn(_) | Command::Auth(_) => {
                self.reply(Status::NotImplemented, "Not implemented").await?;
                self.error_count = 0;
            }

            Command::Quit => {
                self.reply(Status::GoodBye, "Bye").await?;
                info!("Client {} disconnected", self.peer);
                return Ok(Flow::Quit);
            }

            // Handled by the run loop before dispatch.
            Command::StartTls => unreachable!("STARTTLS is handled by the run loop"),
        }

        Ok(Flow::Continue)
    }

    /// Read the dot-terminated body, undoing SMTP dot-stuffing.
    ///
    /// Line endings inside the body are preserved byte-exactly; the
    /// terminating `.` line is not part of the body.
    async fn read_dot_body(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut body = Vec::new();

        loop {
            let Some(line) = self.read_wire_line().await? else {
                return Err(ConnectionError::Closed.into());
            };

            if trim_line_ending(&line) == b"." {
                return Ok(body);
            }

            if line.first() == Some(&b'.') {
                body.extend_from_slice(&line[1..]);
            } else {
                body.extend_from_slice(&line);
            }
        }
    }

    /// One line off the wire, bounded by the configured read deadline.
    async fn read_wire_line(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::time::timeout(self.config.read_timeout, self.connection.read_line()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::Timeout.into()),
        }
    }

    async fn reply(&mut self, status: Status, text: &str) -> anyhow::Result<()> {
        let line = format!("{status} {text}");
        trace!("{}: {line}", self.peer);
        self.connection.send(&line).await?;
        Ok(())
    }

    /// Write a multi-line reply: `NNN-` on every line but the last, and
    /// exactly one terminal `NNN ` line.
    async fn reply_multiline(&mut self, status: Status, lines: &[String]) -> anyhow::Result<()> {
        for (idx, text) in lines.iter().enumerate() {
            let sep = if idx == lines.len() - 1 { ' ' } else { '-' };
            let line = format!("{status}{sep}{text}");
            trace!("{}: {line}", self.peer);
            self.connection.send(&line).await?;
        }
        Ok(())
    }

    fn ehlo_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{} Hello {}", self.config.server_name, self.peer),
            format!("SIZE {ADVERTISED_SIZE}"),
            "PIPELINING".to_string(),
            "8BITMIME".to_string(),
            "VRFY".to_string(),
            "HELP".to_string(),
        ];

        // STARTTLS is only on offer while the channel is still plaintext.
        if self.config.tls_context.is_some() && !self.connection.is_tls() {
            lines.push("STARTTLS".to_string());
        }

        lines
    }

    /// Cursory HELO/EHLO argument check. The result is logged, never
    /// surfaced: a honeypot does not lecture its guests.
    fn verify_host(&self, domain: &str) {
        if domain.is_empty() || domain.contains(char::is_whitespace) {
            warn!(
                "Suspicious HELO argument from {}: {:?}; continuing nonetheless",
                self.peer, domain
            );
        }
    }

    fn protocol_error_exhausted(&mut self) -> bool {
        self.error_count += 1;
        self.error_count >= MAX_CONSECUTIVE_ERRORS
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
