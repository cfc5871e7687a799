// MIT License - Copyright (c) 2026 Peter Wright
// Line codec for the WattBox integration protocol

//! Encoding of outgoing request lines and classification of incoming lines.
//!
//! Every line on the wire is ASCII text terminated by a single `\n`. The
//! first character (the sigil) decides what a line means:
//!
//! | Line                 | Meaning                                        |
//! |----------------------|------------------------------------------------|
//! | `?Name=v1,v2`        | response to a pending query                    |
//! | `?Name` / `!Name...` | echo of a request (telnet echo)                |
//! | `OK`                 | success for a control command                  |
//! | `#Error`             | generic failure of the most recent command     |
//! | `~Name=v1,v2`        | unsolicited device notification                |
//!
//! Anything else is either a login/password prompt or unknown text.

use std::fmt;

use crate::constants::{
    CONTROL_SIGIL, ERROR_RESPONSE, ERROR_SIGIL, LF, LOGIN_PROMPTS, OK_RESPONSE, PASSWORD_PROMPTS,
    QUERY_SIGIL, UNSOLICITED_SIGIL,
};
use crate::error::{Result, WattBoxError};

/// Whether a request reads state (`?`) or changes it (`!`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Query,
    Control,
}

impl CommandKind {
    pub fn sigil(&self) -> char {
        match self {
            Self::Query => QUERY_SIGIL,
            Self::Control => CONTROL_SIGIL,
        }
    }
}

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Echo of a request we sent.
    Echo(String),
    /// `?Name=fields` answer to a query.
    Response { name: String, fields: Vec<String> },
    /// `OK` acknowledgement of a control command.
    Ok,
    /// `#Error`.
    Error,
    /// `~Name=fields` asynchronous notification.
    Unsolicited { name: String, fields: Vec<String> },
    /// Login or password prompt text.
    Prompt(String),
    Blank,
    Unknown(String),
}

impl Line {
    /// Short label used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Echo(_) => "echo",
            Self::Response { .. } => "response",
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Unsolicited { .. } => "unsolicited",
            Self::Prompt(_) => "prompt",
            Self::Blank => "blank",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Echo(s) | Self::Prompt(s) | Self::Unknown(s) => f.write_str(s),
            Self::Response { name, fields } => {
                write!(f, "{}{}={}", QUERY_SIGIL, name, fields.join(","))
            }
            Self::Ok => f.write_str(OK_RESPONSE),
            Self::Error => f.write_str(ERROR_RESPONSE),
            Self::Unsolicited { name, fields } => {
                write!(f, "{}{}={}", UNSOLICITED_SIGIL, name, fields.join(","))
            }
            Self::Blank => Ok(()),
        }
    }
}

/// Encode a request into its wire form, including the trailing `\n`.
///
/// `encode(Control, "OutletSet", ["3", "ON", "0"])` → `!OutletSet=3,ON,0\n`.
pub fn encode<S: AsRef<str>>(kind: CommandKind, name: &str, params: &[S]) -> Result<Vec<u8>> {
    validate_name(name)?;
    let mut line = String::with_capacity(name.len() + 16);
    line.push(kind.sigil());
    line.push_str(name);
    for (i, param) in params.iter().enumerate() {
        let param = param.as_ref();
        if param.contains(['\r', '\n']) {
            return Err(WattBoxError::InvalidArgument(format!(
                "parameter {} of {} contains a line break",
                i + 1,
                name
            )));
        }
        line.push(if i == 0 { '=' } else { ',' });
        line.push_str(param);
    }
    let mut bytes = line.into_bytes();
    bytes.push(LF);
    Ok(bytes)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WattBoxError::InvalidArgument("empty command name".into()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(WattBoxError::InvalidArgument(format!(
            "command name {:?} contains {:?}",
            name, c
        )));
    }
    Ok(())
}

/// Classifies inbound lines. Prompt recognition is configurable because
/// firmware variants word their login prompt differently.
#[derive(Debug, Clone)]
pub struct Classifier {
    prompts: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(LOGIN_PROMPTS.iter().chain(PASSWORD_PROMPTS))
    }
}

impl Classifier {
    pub fn new<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prompts: prompts
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn classify(&self, raw: &str) -> Line {
        let line = raw.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();

        if trimmed.is_empty() {
            return Line::Blank;
        }
        if trimmed == OK_RESPONSE {
            return Line::Ok;
        }

        let mut chars = trimmed.chars();
        match chars.next() {
            Some(QUERY_SIGIL) => match split_payload(chars.as_str()) {
                Some((name, fields)) => Line::Response { name, fields },
                None => Line::Echo(trimmed.to_string()),
            },
            Some(CONTROL_SIGIL) => Line::Echo(trimmed.to_string()),
            Some(ERROR_SIGIL) => Line::Error,
            Some(UNSOLICITED_SIGIL) => match split_payload(chars.as_str()) {
                Some((name, fields)) => Line::Unsolicited { name, fields },
                None => Line::Unsolicited {
                    name: chars.as_str().trim().to_string(),
                    fields: Vec::new(),
                },
            },
            _ if self.is_prompt(trimmed) => Line::Prompt(trimmed.to_string()),
            _ => Line::Unknown(trimmed.to_string()),
        }
    }

    /// Case-insensitive substring match against the known prompts.
    pub fn is_prompt(&self, text: &str) -> bool {
        contains_any(text, &self.prompts)
    }
}

/// Classify with the default prompt set.
pub fn classify(raw: &str) -> Line {
    Classifier::default().classify(raw)
}

/// Case-insensitive check whether `text` contains any of the needles.
pub(crate) fn contains_any<S: AsRef<str>>(text: &str, needles: &[S]) -> bool {
    let lower = text.to_ascii_lowercase();
    needles
        .iter()
        .any(|n| lower.contains(&n.as_ref().to_ascii_lowercase()))
}

/// Split `Name=a,b,c` into the name and its fields.
///
/// Braced lists (`{Outlet 1},{Outlet 2}`) are split on the braces so that
/// names containing commas survive.
fn split_payload(rest: &str) -> Option<(String, Vec<String>)> {
    let (name, payload) = rest.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), split_fields(payload)))
}

pub(crate) fn split_fields(payload: &str) -> Vec<String> {
    let payload = payload.trim();
    if payload.starts_with('{') {
        return parse_braced(payload);
    }
    payload.split(',').map(|s| s.trim().to_string()).collect()
}

/// Extract the contents of every `{...}` group.
pub(crate) fn parse_braced(payload: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = payload;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                out.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}
