// MIT License - Copyright (c) 2026 Peter Wright
// Request/response dispatcher

//! The dispatcher is the only code that touches an authenticated session.
//!
//! Requests arrive on an mpsc queue and are served strictly in submission
//! order, one at a time: write the line, then read until the line that
//! answers it. The protocol has no request ids, so FIFO position is the
//! only correlation there is. Unsolicited `~` lines can arrive at any
//! moment and are forwarded to the event channel instead.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{Classifier, CommandKind, Line};
use crate::connection::{ConnectionState, StateTracker};
use crate::error::{Result, WattBoxError};
use crate::event::{ClientEvent, EventSender};
use crate::models::UnsolicitedMessage;
use crate::protocol::{Command, Reply};
use crate::transport::Session;

/// How long an idle read waits before looping. Only bounds the select.
const IDLE_READ: Duration = Duration::from_secs(3600);

/// A queued request and the slot its result is delivered to.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub(crate) kind: CommandKind,
    pub(crate) name: String,
    /// Wire form without terminator, for logs and errors.
    pub(crate) label: String,
    pub(crate) line: Vec<u8>,
    pub(crate) closes_session: bool,
    pub(crate) enqueued_at: Instant,
    pub(crate) deadline: Instant,
    pub(crate) reply: oneshot::Sender<Result<Reply>>,
}

impl PendingCommand {
    pub(crate) fn new(
        command: &Command,
        timeout: Duration,
    ) -> Result<(Self, oneshot::Receiver<Result<Reply>>)> {
        let line = command.encode()?;
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        Ok((
            Self {
                kind: command.kind(),
                name: command.name().to_string(),
                label: command.to_wire_string(),
                line,
                closes_session: command.closes_session(),
                enqueued_at: now,
                deadline: now + timeout,
                reply: tx,
            },
            rx,
        ))
    }

    fn resolve(self, result: Result<Reply>) {
        match &result {
            Ok(_) => debug!(
                "{} completed in {:?}",
                self.label,
                self.enqueued_at.elapsed()
            ),
            Err(e) => debug!("{} failed: {}", self.label, e),
        }
        // The caller may have given up already.
        let _ = self.reply.send(result);
    }
}

/// Why a dispatcher run ended.
#[derive(Debug)]
pub(crate) enum DispatchExit {
    /// Close requested, or every handle to the connection is gone.
    Shutdown,
    /// A command timed out; the connection is `Degraded`.
    Degraded(String),
    /// The transport failed.
    Fault(String),
}

pub(crate) struct Dispatcher<'a> {
    session: &'a mut Session,
    classifier: &'a Classifier,
    state: &'a StateTracker,
    events: &'a EventSender,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        classifier: &'a Classifier,
        state: &'a StateTracker,
        events: &'a EventSender,
    ) -> Self {
        Self {
            session,
            classifier,
            state,
            events,
        }
    }

    /// Serve requests until shutdown or a transport fault.
    pub(crate) async fn run(
        &mut self,
        requests: &mut mpsc::Receiver<PendingCommand>,
        cancel: &CancellationToken,
    ) -> DispatchExit {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return DispatchExit::Shutdown,
                next = requests.recv() => match next {
                    Some(pending) => {
                        if let Err(exit) = self.execute(pending).await {
                            return exit;
                        }
                    }
                    None => return DispatchExit::Shutdown,
                },
                line = self.session.read_line(Instant::now() + IDLE_READ) => match line {
                    Ok(line) => {
                        if let Err(exit) = self.handle_idle_line(&line) {
                            return exit;
                        }
                    }
                    Err(WattBoxError::Timeout { .. }) => {}
                    Err(e) => {
                        warn!("Connection to {} lost while idle: {}", self.session.peer(), e);
                        return DispatchExit::Fault(e.to_string());
                    }
                },
            }
        }
    }

    /// Send one command and read until its answer.
    ///
    /// `Err` means the session can no longer be used; the command has
    /// already been resolved either way.
    async fn execute(&mut self, pending: PendingCommand) -> std::result::Result<(), DispatchExit> {
        if pending.reply.is_closed() {
            debug!("Skipping {}: caller went away", pending.label);
            return Ok(());
        }
        if Instant::now() >= pending.deadline {
            let command = pending.label.clone();
            debug!("{} expired in the queue, not sending", command);
            pending.resolve(Err(WattBoxError::Timeout { command }));
            return Ok(());
        }

        debug!("Sending command: {}", pending.label);
        match timeout_at(pending.deadline, self.session.write_line(&pending.line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to write {}: {}", pending.label, e);
                let reason = e.to_string();
                pending.resolve(Err(e));
                return Err(DispatchExit::Fault(reason));
            }
            Err(_) => {
                warn!("Timeout writing {}, device is not reading", pending.label);
                self.state.set(ConnectionState::Degraded);
                let reason = format!("timeout writing {}", pending.label);
                let command = pending.label.clone();
                pending.resolve(Err(WattBoxError::Timeout { command }));
                return Err(DispatchExit::Degraded(reason));
            }
        }

        loop {
            let raw = match self.session.read_line(pending.deadline).await {
                Ok(raw) => raw,
                Err(WattBoxError::Timeout { .. }) => {
                    warn!("Timeout waiting for response to {}", pending.label);
                    self.state.set(ConnectionState::Degraded);
                    let reason = format!("timeout waiting for response to {}", pending.label);
                    let command = pending.label.clone();
                    pending.resolve(Err(WattBoxError::Timeout { command }));
                    return Err(DispatchExit::Degraded(reason));
                }
                Err(e) if pending.closes_session && e.is_transport_fault() => {
                    info!("{} accepted, device closed the session", pending.label);
                    let reason = format!("session ended by {}", pending.label);
                    pending.resolve(Ok(Reply::Ack));
                    return Err(DispatchExit::Fault(reason));
                }
                Err(e) => {
                    warn!("Connection lost waiting for {}: {}", pending.label, e);
                    let reason = e.to_string();
                    pending.resolve(Err(e));
                    return Err(DispatchExit::Fault(reason));
                }
            };

            // Telnet echo of the request itself. `?Name=args` would otherwise
            // classify as a response to the same query.
            if raw.trim() == pending.label {
                trace!("Skipping echo of {}", pending.label);
                continue;
            }

            match self.classifier.classify(&raw) {
                Line::Unsolicited { name, fields } => self.publish(name, fields),
                Line::Echo(_) | Line::Blank => {
                    trace!("Skipping {:?} while waiting for {}", raw, pending.label);
                }
                Line::Prompt(prompt) => {
                    warn!("Device asked to log in again while waiting for {}", pending.label);
                    let reason = format!("login prompt {:?} in an authenticated session", prompt);
                    let command = pending.label.clone();
                    pending.resolve(Err(WattBoxError::Protocol {
                        command,
                        details: reason.clone(),
                    }));
                    return Err(DispatchExit::Fault(reason));
                }
                Line::Ok if pending.kind == CommandKind::Control => {
                    pending.resolve(Ok(Reply::Ack));
                    return Ok(());
                }
                Line::Error => {
                    let command = pending.label.clone();
                    pending.resolve(Err(WattBoxError::Device { command }));
                    return Ok(());
                }
                Line::Response { name, fields }
                    if pending.kind == CommandKind::Query
                        && name.eq_ignore_ascii_case(&pending.name) =>
                {
                    pending.resolve(Ok(Reply::Values(fields)));
                    return Ok(());
                }
                other => {
                    warn!("Unexpected {} line for {}: {:?}", other.kind(), pending.label, raw);
                    let err = WattBoxError::Protocol {
                        command: pending.label.clone(),
                        details: format!("unexpected {} line {:?}", other.kind(), raw),
                    };
                    pending.resolve(Err(err));
                    return Ok(());
                }
            }
        }
    }

    fn handle_idle_line(&self, raw: &str) -> std::result::Result<(), DispatchExit> {
        match self.classifier.classify(raw) {
            Line::Unsolicited { name, fields } => self.publish(name, fields),
            Line::Blank | Line::Echo(_) => {}
            Line::Prompt(prompt) => {
                warn!("Device asked to log in again on {}", self.session.peer());
                return Err(DispatchExit::Fault(format!(
                    "login prompt {:?} in an authenticated session",
                    prompt
                )));
            }
            other => debug!("Discarding idle {} line: {:?}", other.kind(), raw),
        }
        Ok(())
    }

    fn publish(&self, name: String, fields: Vec<String>) {
        debug!("Unsolicited: ~{}={}", name, fields.join(","));
        let _ = self
            .events
            .send(ClientEvent::Unsolicited(UnsolicitedMessage::new(name, fields)));
    }
}

/// Reject every queued request, e.g. after the connection has failed.
pub(crate) fn drain(
    requests: &mut mpsc::Receiver<PendingCommand>,
    error: impl Fn() -> WattBoxError,
) {
    requests.close();
    let mut drained = 0;
    while let Ok(pending) = requests.try_recv() {
        pending.resolve(Err(error()));
        drained += 1;
    }
    if drained > 0 {
        debug!("Rejected {} queued command(s)", drained);
    }
}
