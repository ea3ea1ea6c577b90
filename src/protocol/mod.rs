//! Wire protocol between generated scripts and the engine.
//!
//! Every script prints exactly one envelope to stdout:
//!
//! ```text
//! OK <GS> payload
//! ERR <GS> code <GS> message
//! ```
//!
//! Payloads use three ASCII separators that never appear in ordinary
//! application text: Group (`0x1D`) between sections, Record (`0x1E`)
//! between rows and Unit (`0x1F`) between fields.
//!
//! # Examples
//!
//! ```
//! use script_relay::protocol::{self, ProtocolResponse, RECORD_SEP, UNIT_SEP};
//!
//! let rows = vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]];
//! let payload = protocol::encode_rows(&rows);
//! assert_eq!(payload, format!("a{UNIT_SEP}b{RECORD_SEP}c"));
//!
//! let raw = protocol::encode_success(&payload);
//! match protocol::decode_envelope(&raw) {
//!     ProtocolResponse::Success { payload } => {
//!         assert_eq!(protocol::decode_rows(&payload), rows);
//!     },
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod codes;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separates sections and envelope parts.
pub const GROUP_SEP: char = '\u{1D}';
/// Separates rows.
pub const RECORD_SEP: char = '\u{1E}';
/// Separates fields.
pub const UNIT_SEP: char = '\u{1F}';

const OK_PREFIX: &str = "OK";
const ERR_PREFIX: &str = "ERR";

/// Shape of the payload an operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A single text value.
    Scalar,
    /// One of the fixed [`ActionCode`]s.
    Action,
    /// A list of rows, each a list of fields.
    Rows,
    /// Named sections, each a list of items.
    Sections,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scalar => "scalar",
            Self::Action => "action",
            Self::Rows => "rows",
            Self::Sections => "sections",
        };
        f.write_str(s)
    }
}

/// Outcome codes an action script may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCode {
    /// The action was performed.
    Done,
    /// The addressed object does not exist.
    NotFound,
    /// The object was already in the requested state.
    NoChange,
}

impl ActionCode {
    /// All codes, in wire order.
    pub const ALL: [ActionCode; 3] = [Self::Done, Self::NotFound, Self::NoChange];

    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::NotFound => "not_found",
            Self::NoChange => "no_change",
        }
    }

    /// Parse a wire code; surrounding whitespace is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL.into_iter().find(|code| code.as_str() == text)
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResponse {
    /// `OK` envelope.
    Success {
        /// Everything after the first Group separator.
        payload: String,
    },
    /// `ERR` envelope, or a synthetic failure for unreadable output.
    Failure {
        /// Error number ([`codes::UNPARSEABLE`] for synthetic failures).
        code: i32,
        /// Error message.
        message: String,
    },
}

impl ProtocolResponse {
    fn unparseable(message: impl Into<String>) -> Self {
        Self::Failure {
            code: codes::UNPARSEABLE,
            message: message.into(),
        }
    }
}

/// One named section of a sections payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Section name (never empty after decoding).
    pub name: String,
    /// Non-empty items.
    pub items: Vec<String>,
}

impl Section {
    /// Create a section.
    pub fn new(name: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }
}

/// A decoded payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Verbatim text.
    Scalar(String),
    /// A validated action code.
    Action(ActionCode),
    /// Rows of fields.
    Rows(Vec<Vec<String>>),
    /// Named sections.
    Sections(Vec<Section>),
}

/// Decode the envelope printed by a script.
///
/// Never fails: unreadable output becomes a [`ProtocolResponse::Failure`]
/// with code [`codes::UNPARSEABLE`]. One trailing line ending (added by
/// the interpreter) is removed first.
pub fn decode_envelope(raw: &str) -> ProtocolResponse {
    let raw = strip_line_ending(raw);
    if raw.trim().is_empty() {
        return ProtocolResponse::unparseable("Empty response");
    }

    let parts: Vec<&str> = raw.split(GROUP_SEP).collect();
    if parts.len() < 2 {
        return ProtocolResponse::unparseable("Malformed response");
    }

    match parts[0] {
        OK_PREFIX => ProtocolResponse::Success {
            payload: join_group(&parts[1..]),
        },
        ERR_PREFIX => {
            let code = parts[1].trim().parse::<i32>().unwrap_or(codes::UNPARSEABLE);
            let message = if parts.len() > 2 {
                join_group(&parts[2..])
            } else {
                String::new()
            };
            let message = if message.is_empty() {
                codes::UNKNOWN_ERROR.to_string()
            } else {
                message
            };
            ProtocolResponse::Failure { code, message }
        },
        other => ProtocolResponse::unparseable(format!("Unknown status prefix: {other}")),
    }
}

/// `true` if `raw` is an `ERR` envelope written by the script, as opposed
/// to text the codec could not read.
pub fn is_error_envelope(raw: &str) -> bool {
    strip_line_ending(raw)
        .strip_prefix(ERR_PREFIX)
        .is_some_and(|rest| rest.starts_with(GROUP_SEP))
}

fn strip_line_ending(raw: &str) -> &str {
    raw.strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(raw)
}

fn join_group(parts: &[&str]) -> String {
    let mut sep = [0u8; 4];
    parts.join(GROUP_SEP.encode_utf8(&mut sep))
}

/// Decode a payload according to its kind.
pub fn decode_payload(kind: PayloadKind, payload: &str) -> Result<Payload> {
    match kind {
        PayloadKind::Scalar => Ok(Payload::Scalar(payload.to_string())),
        PayloadKind::Action => decode_action(payload).map(Payload::Action),
        PayloadKind::Rows => Ok(Payload::Rows(decode_rows(payload))),
        PayloadKind::Sections => Ok(Payload::Sections(decode_sections(payload))),
    }
}

/// Decode an action payload.
pub fn decode_action(payload: &str) -> Result<ActionCode> {
    ActionCode::parse(payload).ok_or_else(|| Error::InvalidActionCode {
        code: payload.trim().to_string(),
    })
}

/// Decode a rows payload. Never fails; garbage yields whatever rows it
/// contains.
pub fn decode_rows(payload: &str) -> Vec<Vec<String>> {
    payload
        .split(RECORD_SEP)
        .filter(|row| !row.is_empty())
        .map(decode_row)
        .collect()
}

fn decode_row(row: &str) -> Vec<String> {
    let mut fields: Vec<String> = row.split(UNIT_SEP).map(str::to_string).collect();
    // A trailing Unit separator only terminates the last field.
    while fields.len() > 1 && fields.last().is_some_and(String::is_empty) {
        fields.pop();
    }
    fields
}

/// Decode a sections payload. Sections without a name are dropped, as are
/// empty items.
pub fn decode_sections(payload: &str) -> Vec<Section> {
    payload
        .split(GROUP_SEP)
        .filter_map(|chunk| {
            let mut fields = chunk.split(UNIT_SEP);
            let name = fields.next().unwrap_or_default();
            if name.is_empty() {
                return None;
            }
            let items = fields
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
            Some(Section::new(name, items))
        })
        .collect()
}

/// Build an `OK` envelope.
pub fn encode_success(payload: &str) -> String {
    format!("{OK_PREFIX}{GROUP_SEP}{payload}")
}

/// Build an `ERR` envelope.
pub fn encode_error(code: i32, message: &str) -> String {
    format!("{ERR_PREFIX}{GROUP_SEP}{code}{GROUP_SEP}{message}")
}

/// Encode rows the way the generated scripts do.
pub fn encode_rows(rows: &[Vec<String>]) -> String {
    let mut unit = [0u8; 4];
    let mut record = [0u8; 4];
    let unit = UNIT_SEP.encode_utf8(&mut unit);
    rows.iter()
        .map(|row| row.join(unit))
        .collect::<Vec<_>>()
        .join(RECORD_SEP.encode_utf8(&mut record))
}

/// Encode sections the way the generated scripts do.
pub fn encode_sections(sections: &[Section]) -> String {
    let mut group = [0u8; 4];
    sections
        .iter()
        .map(|section| {
            let mut out = section.name.clone();
            for item in &section.items {
                out.push(UNIT_SEP);
                out.push_str(item);
            }
            out
        })
        .collect::<Vec<_>>()
        .join(GROUP_SEP.encode_utf8(&mut group))
}
