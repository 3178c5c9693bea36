//! # Provenance Log Grammar (Recorder ↔ Graph Builder)
//!
//! Defines the value types and the line grammar shared between the recorder
//! that runs inside the instrumented process and the offline tools that turn
//! the log into a provenance graph. Every line is one event; fields are
//! colon-separated and the prefixes are fixed.
//!
//! ## Line Grammar
//!
//! ```text
//! o:ufdN:name                              descriptor N bound to a path
//! u:exe:name                               process used (read) a path
//! g:c:exe:name | g:t:exe:name | g:u:exe:name   generated: created/truncated/updated
//! c:ufdN                                   descriptor N closed
//! x:pid:exe                                process image exec'd
//! w:KIND:ufdD:destOff:ufdS:srcOff:length   destination range derived from source range
//! #...                                     annotation, ignored by consumers
//! ```
//!
//! ## Key Types
//!
//! - [`StableId`] - Non-reused descriptor identity (`ufd`)
//! - [`SourceByte`] - Taint anchor: one byte of one source
//! - [`RangeRecord`] - Typed run produced by the range classifier
//! - [`ProvRecord`] - Tagged union of every line variant, with one serializer each

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ============================================================================
// Descriptor Constants
// ============================================================================

/// Default bound on raw descriptor numbers tracked per process
///
/// Descriptor numbers at or above the configured bound are a hard error.
pub const MAX_OPEN_FILES: usize = 1024;

pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;
pub const STDERR_FILENO: i32 = 2;

/// Number of standard streams (one past the largest standard descriptor)
pub const STDFD_MAX: usize = 3;

/// Returns `true` for the three inherited standard descriptors
#[must_use]
pub fn is_std_fd(fd: i32) -> bool {
    fd == STDIN_FILENO || fd == STDOUT_FILENO || fd == STDERR_FILENO
}

// ============================================================================
// Identities and Anchors
// ============================================================================

/// Stable descriptor identity (`ufd`)
///
/// Unlike OS descriptor numbers, which the kernel recycles as soon as they
/// are closed, stable ids increase monotonically and are never reissued.
/// This makes them safe to use as taint marks.
///
/// **Value**:
/// - `0`: No identity assigned
/// - `1..`: Issued identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct StableId(pub u32);

impl StableId {
    /// Reserved value meaning "no identity assigned"
    pub const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ufd{}", self.0)
    }
}

impl FromStr for StableId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("ufd")
            .and_then(|n| n.parse::<u32>().ok())
            .map(StableId)
            .ok_or_else(|| ParseError::InvalidStableId(s.to_string()))
    }
}

/// One byte of one source: the taint mark carried by a destination byte
///
/// Deserializes from either `{"ufd": 1, "offset": 40}` or `[1, 40]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceByte {
    pub ufd: StableId,
    pub offset: u64,
}

impl SourceByte {
    #[must_use]
    pub fn new(ufd: StableId, offset: u64) -> Self {
        Self { ufd, offset }
    }
}

// ============================================================================
// Range Records
// ============================================================================

/// How a destination run relates to its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RangeKind {
    /// Single byte, or no pattern applies
    None,
    /// Contiguous forward copy: `d+i` came from `s+i`
    Seq,
    /// Fill: every destination byte came from the same source offset
    Rep,
}

impl RangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RangeKind::None => "NONE",
            RangeKind::Seq => "SEQ",
            RangeKind::Rep => "REP",
        }
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(RangeKind::None),
            "SEQ" => Ok(RangeKind::Seq),
            "REP" => Ok(RangeKind::Rep),
            other => Err(ParseError::UnknownRangeKind(other.to_string())),
        }
    }
}

/// A maximal homogeneous run of destination bytes
///
/// `start` is relative to the beginning of the write; the emitter adds the
/// write's base offset. `source` is the anchor of the run's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeRecord {
    pub kind: RangeKind,
    pub start: u64,
    pub length: u64,
    pub source: SourceByte,
}

// ============================================================================
// Generation Lines
// ============================================================================

/// Why a path counts as generated by the process at open time
///
/// Only one fires per open, by priority `Created > Truncated > Updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GenerationKind {
    Created,
    Truncated,
    /// Opened for writing in place
    Updated,
}

impl GenerationKind {
    /// Single-letter code used in `g:` lines
    #[must_use]
    pub fn code(self) -> char {
        match self {
            GenerationKind::Created => 'c',
            GenerationKind::Truncated => 't',
            GenerationKind::Updated => 'u',
        }
    }

    /// Annotation text used in the `#g:` line preceding the generation line
    #[must_use]
    pub fn annotation(self) -> &'static str {
        match self {
            GenerationKind::Created => "g:created",
            GenerationKind::Truncated => "g:truncated",
            GenerationKind::Updated => "g:updated",
        }
    }

    fn from_code(code: &str) -> Result<Self, ParseError> {
        match code {
            "c" => Ok(GenerationKind::Created),
            "t" => Ok(GenerationKind::Truncated),
            "u" => Ok(GenerationKind::Updated),
            other => Err(ParseError::UnknownGeneration(other.to_string())),
        }
    }
}

// ============================================================================
// Log Lines
// ============================================================================

/// One line of the provenance log
///
/// `Display` renders the line without its trailing newline; [`ProvRecord::parse`]
/// reads it back. Names are borrowed so the recorder never allocates to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvRecord<'a> {
    /// `o:ufdN:name`
    Open { ufd: StableId, name: &'a str },
    /// `u:exe:name`
    Used { exe: &'a str, name: &'a str },
    /// `#text`
    Comment(&'a str),
    /// `g:K:exe:name`
    Generated { kind: GenerationKind, exe: &'a str, name: &'a str },
    /// `c:ufdN`
    Close { ufd: StableId },
    /// `x:pid:exe`
    Exec { pid: u32, exe: &'a str },
    /// `w:KIND:ufdD:destOff:ufdS:srcOff:length`
    Write { kind: RangeKind, dest: StableId, dest_offset: u64, source: SourceByte, length: u64 },
}

impl fmt::Display for ProvRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvRecord::Open { ufd, name } => write!(f, "o:{ufd}:{name}"),
            ProvRecord::Used { exe, name } => write!(f, "u:{exe}:{name}"),
            ProvRecord::Comment(text) => write!(f, "#{text}"),
            ProvRecord::Generated { kind, exe, name } => {
                write!(f, "g:{}:{exe}:{name}", kind.code())
            }
            ProvRecord::Close { ufd } => write!(f, "c:{ufd}"),
            ProvRecord::Exec { pid, exe } => write!(f, "x:{pid}:{exe}"),
            ProvRecord::Write { kind, dest, dest_offset, source, length } => write!(
                f,
                "w:{kind}:{dest}:{dest_offset}:{}:{}:{length}",
                source.ufd, source.offset
            ),
        }
    }
}

impl<'a> ProvRecord<'a> {
    /// Parse one log line (without its newline)
    ///
    /// Path names are the last field and may themselves contain `:`.
    ///
    /// # Errors
    /// Returns [`ParseError`] for empty lines, unknown prefixes and malformed fields.
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        if let Some(text) = line.strip_prefix('#') {
            return Ok(ProvRecord::Comment(text));
        }

        let (prefix, rest) = line.split_once(':').ok_or(ParseError::Malformed {
            record: "line",
            line: line.to_string(),
        })?;

        match prefix {
            "o" => {
                let (ufd, name) = split_field(rest, "open", line)?;
                Ok(ProvRecord::Open { ufd: ufd.parse()?, name })
            }
            "u" => {
                let (exe, name) = split_field(rest, "used", line)?;
                Ok(ProvRecord::Used { exe, name })
            }
            "g" => {
                let (code, rest) = split_field(rest, "generated", line)?;
                let (exe, name) = split_field(rest, "generated", line)?;
                Ok(ProvRecord::Generated { kind: GenerationKind::from_code(code)?, exe, name })
            }
            "c" => Ok(ProvRecord::Close { ufd: rest.parse()? }),
            "x" => {
                let (pid, exe) = split_field(rest, "exec", line)?;
                Ok(ProvRecord::Exec { pid: parse_number(pid, "pid")?, exe })
            }
            "w" => {
                let fields: Vec<&str> = rest.split(':').collect();
                let [kind, dest, dest_offset, src, src_offset, length] = fields.as_slice() else {
                    return Err(ParseError::Malformed { record: "write", line: line.to_string() });
                };
                Ok(ProvRecord::Write {
                    kind: kind.parse()?,
                    dest: dest.parse()?,
                    dest_offset: parse_number(dest_offset, "destOff")?,
                    source: SourceByte::new(src.parse()?, parse_number(src_offset, "srcOff")?),
                    length: parse_number(length, "length")?,
                })
            }
            other => Err(ParseError::UnknownPrefix(other.to_string())),
        }
    }
}

fn split_field<'a>(
    rest: &'a str,
    record: &'static str,
    line: &str,
) -> Result<(&'a str, &'a str), ParseError> {
    rest.split_once(':').ok_or_else(|| ParseError::Malformed { record, line: line.to_string() })
}

fn parse_number<T: FromStr>(value: &str, field: &'static str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber { field, value: value.to_string() })
}

/// Errors raised while reading a provenance log line
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown record prefix: {0}")]
    UnknownPrefix(String),

    #[error("Malformed {record} record: {line}")]
    Malformed { record: &'static str, line: String },

    #[error("Invalid stable id: {0}")]
    InvalidStableId(String),

    #[error("Invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Unknown range kind: {0}")]
    UnknownRangeKind(String),

    #[error("Unknown generation kind: {0}")]
    UnknownGeneration(String),
}
