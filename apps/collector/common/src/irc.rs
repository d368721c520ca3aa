//! Chat protocol session: handshake, keep-alive and line parsing for the
//! IRC-style chat feed.

use crate::error::ServiceError;
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_HOST: &str = "irc.chat.twitch.tv";
pub const DEFAULT_PORT: u16 = 6667;

static PRIVMSG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:([^!\s]+)![^@\s]*@\S+ PRIVMSG #(\S+) :(.*)$").expect("valid PRIVMSG pattern")
});

/// Longest line kept; anything longer is discarded whole
const MAX_LINE: u64 = 8 * 1024;

/// Silence that ends the welcome burst
const BURST_QUIET: Duration = Duration::from_millis(250);

/// End of the NAMES list sent after our JOIN
const RPL_ENDOFNAMES: u16 = 366;

const AUTH_FAILURES: [&str; 2] = ["Login authentication failed", "Improperly formatted auth"];

/// One inbound protocol line, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcMessage {
    Ping(String),
    Welcome,
    AuthFailed(String),
    Reconnect,
    /// Any other three-digit server reply
    Numeric(u16),
    PrivMsg {
        user: String,
        channel: String,
        message: String,
    },
    Other,
}

impl IrcMessage {
    pub fn parse(raw: &str) -> Self {
        let line = strip_tags(raw.trim_end_matches(['\r', '\n']));

        if let Some(rest) = line.strip_prefix("PING") {
            if rest.is_empty() || rest.starts_with(' ') {
                return IrcMessage::Ping(rest.trim_start().to_string());
            }
        }

        if let Some(caps) = PRIVMSG_PATTERN.captures(line) {
            return IrcMessage::PrivMsg {
                user: caps[1].to_string(),
                channel: caps[2].to_string(),
                message: caps[3].to_string(),
            };
        }

        let mut parts = line.split_whitespace();
        let command = if line.starts_with(':') {
            parts.nth(1)
        } else {
            parts.next()
        };

        match command {
            Some("001") => IrcMessage::Welcome,
            Some("RECONNECT") => IrcMessage::Reconnect,
            Some("NOTICE") if AUTH_FAILURES.iter().any(|f| line.contains(f)) => {
                IrcMessage::AuthFailed(line.to_string())
            }
            Some(code) if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) => {
                code.parse().map(IrcMessage::Numeric).unwrap_or(IrcMessage::Other)
            }
            _ => IrcMessage::Other,
        }
    }
}

/// Drops an IRCv3 `@tags ` prefix
fn strip_tags(line: &str) -> &str {
    match line.strip_prefix('@') {
        Some(rest) => rest.split_once(' ').map(|(_, l)| l).unwrap_or(""),
        None => line,
    }
}

/// A keyword hit inside a channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMatch<'a> {
    pub user: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    channel: String,
    keyword: String,
    ignore_case: bool,
}

impl KeywordMatcher {
    pub fn new(channel: &str, keyword: &str, ignore_case: bool) -> Self {
        let keyword = if ignore_case {
            keyword.to_lowercase()
        } else {
            keyword.to_string()
        };
        Self {
            channel: normalize_channel(channel),
            keyword,
            ignore_case,
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the hit when `message` is a message in our channel containing the keyword.
    pub fn matches<'a>(&self, message: &'a IrcMessage) -> Option<ChatMatch<'a>> {
        let IrcMessage::PrivMsg {
            user,
            channel,
            message,
        } = message
        else {
            return None;
        };

        if !channel.eq_ignore_ascii_case(&self.channel) {
            return None;
        }

        let hit = if self.ignore_case {
            message.to_lowercase().contains(&self.keyword)
        } else {
            message.contains(&self.keyword)
        };

        hit.then_some(ChatMatch {
            user: user.as_str(),
            message: message.as_str(),
        })
    }
}

fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Who we log in as and where we join
#[derive(Clone)]
pub struct Identity {
    pub login: String,
    pub channel: String,
    token: String,
}

impl Identity {
    pub fn new(login: &str, channel: &str, token: &str) -> Self {
        let token = token.trim();
        let token = if token.starts_with("oauth:") {
            token.to_string()
        } else {
            format!("oauth:{}", token)
        };

        Self {
            login: login.trim().to_lowercase(),
            channel: normalize_channel(channel),
            token,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("login", &self.login)
            .field("channel", &self.channel)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Session limits
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub welcome_reads: usize,
    pub read_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            welcome_reads: 10,
            read_timeout: Duration::from_secs(360),
        }
    }
}

pub trait ChatStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ChatStream for T {}

pub type Session = IrcSession<Box<dyn ChatStream>>;

/// An open, joined chat connection
pub struct IrcSession<S> {
    id: Uuid,
    stream: BufStream<S>,
    channel: String,
    read_timeout: Duration,
    buf: Vec<u8>,
    pending: Option<IrcMessage>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> IrcSession<S> {
    /// Logs in and joins over an already connected stream.
    ///
    /// Succeeds once the welcome reply arrives within `welcome_reads` lines.
    /// The rest of the welcome burst is read and discarded before returning.
    pub async fn open(
        stream: S,
        identity: &Identity,
        options: SessionOptions,
    ) -> Result<Self, ServiceError> {
        let mut session = Self {
            id: Uuid::new_v4(),
            stream: BufStream::new(stream),
            channel: identity.channel.clone(),
            read_timeout: options.read_timeout,
            buf: Vec::with_capacity(512),
            pending: None,
        };

        match session.handshake(identity, options.welcome_reads).await {
            Ok(()) => {
                info!(
                    session = %session.id,
                    "Joined #{} as {}", identity.channel, identity.login
                );
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        &mut self,
        identity: &Identity,
        welcome_reads: usize,
    ) -> Result<(), ServiceError> {
        self.send(&format!("PASS {}", identity.token)).await?;
        self.send(&format!("NICK {}", identity.login)).await?;
        self.send(&format!("JOIN #{}", identity.channel)).await?;

        for _ in 0..welcome_reads {
            match self.next_message().await? {
                IrcMessage::Welcome => return self.drain_burst(welcome_reads).await,
                IrcMessage::AuthFailed(notice) => {
                    return Err(ServiceError::Connection(format!(
                        "Login rejected: {}",
                        notice
                    )));
                }
                _ => {}
            }
        }

        Err(ServiceError::Connection(format!(
            "No welcome line within {} reads",
            welcome_reads
        )))
    }

    /// Skips server replies following the welcome line.
    ///
    /// Stops at the end of the NAMES list, after a quiet gap, or at the first
    /// line that is not part of the burst, which is kept for `next_message`.
    async fn drain_burst(&mut self, max_reads: usize) -> Result<(), ServiceError> {
        let quiet = self.read_timeout.min(BURST_QUIET);

        for _ in 0..max_reads {
            let ready = match timeout(quiet, self.stream.fill_buf()).await {
                Err(_) => false,
                Ok(Ok(available)) => !available.is_empty(),
                Ok(Err(e)) => return Err(ServiceError::Connection(format!("Read failed: {}", e))),
            };
            if !ready {
                break;
            }

            match self.next_message().await? {
                IrcMessage::Numeric(RPL_ENDOFNAMES) => break,
                IrcMessage::Numeric(_) | IrcMessage::Ping(_) | IrcMessage::Other => {}
                message => {
                    self.pending = Some(message);
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next decodable line. Pings are answered before being returned.
    pub async fn next_message(&mut self) -> Result<IrcMessage, ServiceError> {
        if let Some(message) = self.pending.take() {
            return Ok(message);
        }

        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(ServiceError::Decode(reason)) => {
                    debug!(session = %self.id, "Discarding line: {}", reason);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let message = IrcMessage::parse(&line);
            if let IrcMessage::Ping(payload) = &message {
                let pong = if payload.is_empty() {
                    "PONG".to_string()
                } else {
                    format!("PONG {}", payload)
                };
                self.send(&pong).await?;
                debug!(session = %self.id, "Answered keep-alive");
            }

            return Ok(message);
        }
    }

    /// One line, at most `MAX_LINE` bytes. Oversized or undecodable lines are `Decode` errors.
    async fn read_line(&mut self) -> Result<String, ServiceError> {
        let mut oversized = false;

        loop {
            self.buf.clear();

            let read = timeout(
                self.read_timeout,
                (&mut self.stream)
                    .take(MAX_LINE)
                    .read_until(b'\n', &mut self.buf),
            )
            .await
            .map_err(|_| {
                ServiceError::Connection(format!("No data received for {:?}", self.read_timeout))
            })?
            .map_err(|e| ServiceError::Connection(format!("Read failed: {}", e)))?;

            if read == 0 {
                return Err(ServiceError::Connection(
                    "Connection closed by peer".to_string(),
                ));
            }

            // keep consuming until the end of an oversized line
            if !self.buf.ends_with(b"\n") && read as u64 >= MAX_LINE {
                oversized = true;
                continue;
            }
            if oversized {
                return Err(ServiceError::Decode(format!(
                    "line longer than {} bytes",
                    MAX_LINE
                )));
            }

            return std::str::from_utf8(&self.buf)
                .map(str::to_string)
                .map_err(|e| ServiceError::Decode(e.to_string()));
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), ServiceError> {
        self.stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| ServiceError::Connection(format!("Write failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ServiceError::Connection(format!("Write failed: {}", e)))
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!(session = %self.id, "Shutdown after close failed: {}", e);
        }
    }
}

/// Opens protocol sessions on demand
#[async_trait]
pub trait ChatConnector: Send + Sync {
    async fn connect(&self) -> Result<Session, ServiceError>;
}

#[async_trait]
impl<T: ChatConnector + ?Sized> ChatConnector for std::sync::Arc<T> {
    async fn connect(&self) -> Result<Session, ServiceError> {
        (**self).connect().await
    }
}

pub struct TcpConnector {
    host: String,
    port: u16,
    identity: Identity,
    options: SessionOptions,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, identity: Identity, options: SessionOptions) -> Self {
        Self {
            host: host.to_string(),
            port,
            identity,
            options,
        }
    }
}

#[async_trait]
impl ChatConnector for TcpConnector {
    async fn connect(&self) -> Result<Session, ServiceError> {
        info!("Connecting to chat server {}:{}", self.host, self.port);

        let stream = timeout(
            Duration::from_secs(10),
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ServiceError::Connection("Connect timed out".to_string()))?
        .map_err(|e| ServiceError::Connection(format!("Connect failed: {}", e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle: {}", e);
        }

        let stream: Box<dyn ChatStream> = Box::new(stream);
        IrcSession::open(stream, &self.identity, self.options).await
    }
}
