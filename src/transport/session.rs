// MIT License - Copyright (c) 2026 Peter Wright
// Line-buffered session over a telnet or TLS byte stream

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::codec::contains_any;
use crate::constants::{DO, DONT, IAC, LF, MAX_LINE_BUFFER, SB, SE, WILL, WONT};
use crate::error::{Result, WattBoxError};
use crate::transport::BoxedStream;

const READ_CHUNK: usize = 1024;

/// Owns the live byte stream for one authenticated (or authenticating) session.
///
/// Incoming bytes are passed through a telnet option filter and buffered
/// until a `\n` completes a line. Every read method only touches the
/// buffer after a read has completed, so a read future can be dropped
/// (e.g. from a `select!`) without losing data.
pub struct Session {
    stream: BoxedStream,
    peer: String,
    buf: Vec<u8>,
    telnet: TelnetFilter,
    /// Option refusals waiting to be written.
    outbox: Vec<u8>,
}

impl Session {
    pub fn new(stream: BoxedStream, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            buf: Vec::with_capacity(READ_CHUNK),
            telnet: TelnetFilter::default(),
            outbox: Vec::new(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read the next complete line (terminator stripped).
    pub async fn read_line(&mut self, deadline: Instant) -> Result<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            self.fill(deadline).await?;
        }
    }

    /// Read the next complete line, or the unterminated tail of the buffer
    /// when it contains one of `prompts`.
    ///
    /// Login prompts are not followed by a newline, so this is what the
    /// login handshake reads with.
    pub async fn read_text<S: AsRef<str>>(
        &mut self,
        prompts: &[S],
        deadline: Instant,
    ) -> Result<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            if !self.buf.is_empty() {
                let tail = String::from_utf8_lossy(&self.buf).into_owned();
                if contains_any(&tail, prompts) {
                    self.buf.clear();
                    return Ok(tail);
                }
            }
            self.fill(deadline).await?;
        }
    }

    /// Skip lines until one of `prompts` shows up and return that text.
    pub async fn read_prompt<S: AsRef<str>>(
        &mut self,
        prompts: &[S],
        deadline: Instant,
    ) -> Result<String> {
        loop {
            let text = self.read_text(prompts, deadline).await?;
            if contains_any(&text, prompts) {
                return Ok(text);
            }
            trace!("Skipping pre-prompt text: {:?}", text);
        }
    }

    /// Write one encoded line (terminator included by the caller).
    pub async fn write_line(&mut self, bytes: &[u8]) -> Result<()> {
        self.flush_outbox().await?;
        self.stream
            .write_all(bytes)
            .await
            .map_err(WattBoxError::Write)?;
        self.stream.flush().await.map_err(WattBoxError::Write)?;
        Ok(())
    }

    /// Discard anything already buffered.
    pub fn clear(&mut self) {
        if !self.buf.is_empty() {
            debug!("Discarding {} buffered byte(s)", self.buf.len());
            self.buf.clear();
        }
    }

    /// Close the write side. Errors are ignored: the peer may already be gone.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == LF)?;
        let raw: Vec<u8> = self.buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..pos]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Read one chunk from the stream into the buffer.
    async fn fill(&mut self, deadline: Instant) -> Result<()> {
        // Negotiation replies go out before the read; a peer that stops
        // reading must not hold us past the deadline.
        if timeout_at(deadline, self.flush_outbox()).await.is_err() {
            return Err(WattBoxError::Timeout {
                command: "telnet negotiation".into(),
            });
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = match timeout_at(deadline, self.stream.read(&mut chunk)).await {
            Err(_) => {
                return Err(WattBoxError::Timeout {
                    command: "read".into(),
                });
            }
            Ok(Ok(0)) => {
                debug!("{}: connection closed by peer", self.peer);
                return Err(WattBoxError::Closed);
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(WattBoxError::Io(e)),
        };

        self.telnet
            .filter(&chunk[..n], &mut self.buf, &mut self.outbox);

        if self.buf.len() > MAX_LINE_BUFFER && !self.buf.contains(&LF) {
            warn!(
                "{}: {} bytes without a line terminator, discarding",
                self.peer,
                self.buf.len()
            );
            self.buf.clear();
        }
        Ok(())
    }

    /// Write pending telnet refusals. Progress is recorded after every
    /// partial write so a cancelled flush resumes where it stopped.
    async fn flush_outbox(&mut self) -> Result<()> {
        while !self.outbox.is_empty() {
            let n = self
                .stream
                .write(&self.outbox)
                .await
                .map_err(WattBoxError::Write)?;
            if n == 0 {
                return Err(WattBoxError::Closed);
            }
            self.outbox.drain(..n);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum TelnetState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Strips telnet command sequences from the data stream and refuses every
/// option the peer offers or requests.
#[derive(Debug, Default)]
struct TelnetFilter {
    state: TelnetState,
}

impl TelnetFilter {
    fn filter(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &b in input {
            self.state = match self.state {
                TelnetState::Data if b == IAC => TelnetState::Iac,
                TelnetState::Data => {
                    data.push(b);
                    TelnetState::Data
                }
                TelnetState::Iac => match b {
                    IAC => {
                        data.push(IAC);
                        TelnetState::Data
                    }
                    WILL | WONT | DO | DONT => TelnetState::Negotiate(b),
                    SB => TelnetState::Sub,
                    _ => TelnetState::Data,
                },
                TelnetState::Negotiate(verb) => {
                    match verb {
                        WILL => replies.extend_from_slice(&[IAC, DONT, b]),
                        DO => replies.extend_from_slice(&[IAC, WONT, b]),
                        _ => {}
                    }
                    trace!("Refused telnet option {} (verb {})", b, verb);
                    TelnetState::Data
                }
                TelnetState::Sub if b == IAC => TelnetState::SubIac,
                TelnetState::Sub => TelnetState::Sub,
                TelnetState::SubIac if b == SE => TelnetState::Data,
                TelnetState::SubIac => TelnetState::Sub,
            };
        }
    }
}
