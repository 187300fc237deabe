// src/control.rs
//! Tor control-port client
//!
//! Speaks just enough of the control protocol to authenticate and ask a
//! running Tor where its SOCKS listeners are:
//!
//! ```text
//! C: AUTHENTICATE "secret"
//! S: 250 OK
//! C: GETINFO net/listeners/socks
//! S: 250-net/listeners/socks="127.0.0.1:9050"
//! S: 250 OK
//! ```

use crate::provider::handle::TargetAddr;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, trace};

/// Longest reply line accepted from the control port
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Control-channel failures
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control channel transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("unexpected control reply: {0}")]
    Protocol(String),

    #[error("control channel closed by peer")]
    Closed,
}

impl From<LinesCodecError> for ControlError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => Self::Transport(e),
            LinesCodecError::MaxLineLengthExceeded => {
                Self::Protocol("reply line exceeds maximum length".to_string())
            }
        }
    }
}

/// A complete control-port reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    /// Line bodies without the status prefix; data blocks are joined with `\n`
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status == 250
    }

    /// Text of the final line
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }
}

/// Authenticated (or authenticating) connection to a Tor control port
#[derive(Debug)]
pub struct TorController {
    framed: Framed<TcpStream, LinesCodec>,
    peer: SocketAddr,
    authenticated: bool,
}

impl TorController {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to Tor control port at {}", addr);

        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            peer: addr,
            authenticated: false,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticate with a password; an empty secret sends a bare AUTHENTICATE
    pub async fn authenticate(&mut self, secret: &str) -> Result<(), ControlError> {
        let command = if secret.is_empty() {
            "AUTHENTICATE".to_string()
        } else {
            format!("AUTHENTICATE {}", quote(secret))
        };

        let reply = self.command(&command).await?;
        match reply.status {
            250 => {
                self.authenticated = true;
                Ok(())
            }
            515 => Err(ControlError::Authentication(reply.message().to_string())),
            _ => Err(ControlError::Protocol(format!(
                "{} {}",
                reply.status,
                reply.message()
            ))),
        }
    }

    /// Values reported for `key` by GETINFO
    pub async fn get_info(&mut self, key: &str) -> Result<Vec<String>, ControlError> {
        let reply = self.command(&format!("GETINFO {}", key)).await?;
        if !reply.is_ok() {
            return Err(ControlError::Protocol(format!(
                "GETINFO {} failed: {} {}",
                key,
                reply.status,
                reply.message()
            )));
        }

        let prefix = format!("{}=", key);
        Ok(reply
            .lines
            .iter()
            .filter_map(|line| line.strip_prefix(&prefix))
            .map(|value| value.trim_start_matches('\n').to_string())
            .collect())
    }

    /// Configured SOCKS listeners as (host, port), in the order Tor reports them
    pub async fn socks_listeners(&mut self) -> Result<Vec<(String, u16)>, ControlError> {
        let mut listeners = Vec::new();
        for value in self.get_info("net/listeners/socks").await? {
            for token in tokenize(&value) {
                if token.starts_with("unix:") {
                    trace!("Skipping unix SOCKS listener {}", token);
                    continue;
                }
                let target = token.parse::<TargetAddr>().map_err(|_| {
                    ControlError::Protocol(format!("invalid listener address: {}", token))
                })?;
                listeners.push((target.host(), target.port()));
            }
        }

        Ok(listeners)
    }

    /// Send one command line and wait for its reply
    pub async fn command(&mut self, line: &str) -> Result<Reply, ControlError> {
        trace!("control > {}", line.split_whitespace().next().unwrap_or_default());
        // LinesCodec terminates with \n; the protocol wants CRLF
        self.framed.send(format!("{}\r", line)).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, ControlError> {
        let mut lines = Vec::new();

        loop {
            let line = self.next_line().await?;
            if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
                return Err(ControlError::Protocol(line));
            }

            let status = line[..3]
                .parse::<u16>()
                .map_err(|_| ControlError::Protocol(line.clone()))?;
            let body = line[4..].to_string();

            match line.as_bytes()[3] {
                b' ' => {
                    lines.push(body);
                    return Ok(Reply { status, lines });
                }
                b'-' => lines.push(body),
                b'+' => {
                    let mut data = body;
                    loop {
                        let data_line = self.next_line().await?;
                        if data_line == "." {
                            break;
                        }
                        data.push('\n');
                        // Leading dots are escaped by doubling
                        data.push_str(data_line.strip_prefix('.').unwrap_or(&data_line));
                    }
                    lines.push(data);
                }
                _ => return Err(ControlError::Protocol(line)),
            }
        }
    }

    async fn next_line(&mut self) -> Result<String, ControlError> {
        match self.framed.next().await {
            Some(line) => Ok(line?),
            None => Err(ControlError::Closed),
        }
    }
}

/// Quote a string for the control protocol
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Split a GETINFO value into whitespace separated, optionally quoted tokens
fn tokenize(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = value.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            token.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => token.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    tokens
}
