use std::sync::Arc;

use serde::{Deserialize, Serialize};

// === Error types ===

/// Errors that can occur while framing, encoding or decoding eventio data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Reached end of input at a clean block boundary (no more blocks).
    #[error("end of stream")]
    EndOfStream,

    #[error("channel I/O error: {0}")]
    Channel(Arc<std::io::Error>),

    #[error("buffer overflow: {requested} bytes needed, maximum is {max}")]
    BufferOverflow { requested: usize, max: usize },

    #[error("corrupt item header: {0}")]
    CorruptHeader(String),

    #[error("truncated input: {needed} bytes needed, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("nesting depth exceeded: at most {0} levels are supported")]
    DepthExceeded(usize),

    #[error("item type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: u32, found: u32 },

    #[error("item length mismatch: declared {declared} bytes, actual {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("value {value} out of range for {target}")]
    RangeError { value: String, target: &'static str },

    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Channel(Arc::new(err))
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EndOfStream => ErrorKind::EndOfStream,
            Error::Channel(_) => ErrorKind::Channel,
            Error::BufferOverflow { .. } => ErrorKind::BufferOverflow,
            Error::CorruptHeader(_) => ErrorKind::CorruptHeader,
            Error::TruncatedInput { .. } => ErrorKind::TruncatedInput,
            Error::DepthExceeded(_) => ErrorKind::DepthExceeded,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Error::RangeError { .. } => ErrorKind::RangeError,
            Error::ProtocolMisuse(_) => ErrorKind::ProtocolMisuse,
        }
    }

    pub(crate) fn range<V: std::fmt::Display>(value: V, target: &'static str) -> Self {
        Error::RangeError {
            value: value.to_string(),
            target,
        }
    }
}

/// The kind of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EndOfStream,
    Channel,
    BufferOverflow,
    CorruptHeader,
    TruncatedInput,
    DepthExceeded,
    TypeMismatch,
    LengthMismatch,
    RangeError,
    ProtocolMisuse,
}

pub type Result<T> = std::result::Result<T, Error>;

// === Basic types ===

/// Byte order of the fixed-width values in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// The byte order of the running machine.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    pub fn swapped(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }
}

/// Whether an item is being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Reading,
    Writing,
}

/// Lifecycle state of an item handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    /// Ended cleanly, see [`Closed::status`](crate::Closed::status).
    Done,
    Error(ErrorKind),
}

/// The header of one item.
///
/// When writing, only `type_code`, `version`, `ident`, `user_flag` and
/// `extended` are taken from the caller; `can_search` and `length` are
/// filled in when the item is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemHeader {
    pub type_code: u32,
    pub version: u16,
    pub ident: i32,
    pub user_flag: bool,
    pub extended: bool,
    /// The item consists of sub-items only and may be searched by hopping
    /// over them by length.
    pub can_search: bool,
    /// Length of the data area, excluding the header.
    pub length: u64,
    /// Nesting depth, 0 for top-level blocks.
    pub level: usize,
}

impl ItemHeader {
    pub fn new(type_code: u32, version: u16, ident: i32) -> Self {
        Self {
            type_code,
            version,
            ident,
            ..Default::default()
        }
    }

    pub fn with_user_flag(self, user_flag: bool) -> Self {
        Self { user_flag, ..self }
    }

    pub fn with_extended(self, extended: bool) -> Self {
        Self { extended, ..self }
    }
}
