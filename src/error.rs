use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while reading inputs, building the model, or evaluating a policy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed class file {location}: {source}")]
    MalformedInput {
        location: String,
        #[source]
        source: MalformedInput,
    },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unreadable archive {location}: {reason}")]
    UnreadableArchive { location: String, reason: String },
    #[error("class {class} is matched by more than one subject: {}", subjects.join(", "))]
    AmbiguousSubject {
        class: String,
        subjects: Vec<String>,
    },
    #[error("class {class} is not matched by any subject")]
    UnmatchedSubject { class: String },
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },
    #[error("unknown subject '{0}'")]
    UnknownSubject(String),
    #[error("subject '{0}' is declared twice")]
    DuplicateSubject(String),
    #[error("class {0} is defined twice with different content")]
    ConflictingClass(String),
    #[error("invalid policy: {0}")]
    Policy(String),
}

/// Ways a compiled class byte stream can fail to decode.
#[derive(Error, Debug)]
pub enum MalformedInput {
    #[error("invalid magic identifier 0x{0:08X}")]
    BadMagic(u32),
    #[error("truncated class file")]
    Truncated(#[from] io::Error),
    #[error("invalid constant pool index {0}")]
    InvalidIndex(u16),
    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedEntry { index: u16, expected: &'static str },
    #[error("unknown constant pool tag {0}")]
    UnknownTag(u8),
    #[error("invalid modified UTF-8 constant {0:02X?}")]
    InvalidUtf8(Vec<u8>),
    #[error("invalid descriptor '{0}'")]
    InvalidDescriptor(String),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("invalid {attribute} attribute: {reason}")]
    InvalidAttribute {
        attribute: &'static str,
        reason: String,
    },
}

impl MalformedInput {
    pub(crate) fn at(self, location: impl Into<String>) -> Error {
        Error::MalformedInput {
            location: location.into(),
            source: self,
        }
    }
}
