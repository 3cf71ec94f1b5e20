use std::fmt;
use std::io;

/// Errors surfaced by dataset assembly and polishing. None are retried;
/// a failed run emits no partial output.
#[derive(Debug)]
pub enum Error {
    /// Unrecognized file suffix or malformed record.
    BadFormat(String),
    /// A name exists in both targets and queries but with differing sizes.
    DuplicateMismatch(String),
    /// No query sequences after parsing.
    EmptySequences,
    /// No overlaps survived validation and filtering.
    EmptyOverlaps,
    /// Projection produced a layer with inverted or out-of-range bounds.
    InvalidLayer { first: u32, last: u32 },
    /// Invalid configuration value.
    Config(String),
    /// On-demand pairwise alignment did not complete.
    Alignment(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadFormat(msg) => write!(f, "bad format: {msg}"),
            Error::DuplicateMismatch(name) => {
                write!(f, "duplicate sequence {name} with unequal data")
            }
            Error::EmptySequences => write!(f, "empty sequences set"),
            Error::EmptyOverlaps => write!(f, "empty overlap set"),
            Error::InvalidLayer { first, last } => {
                write!(f, "layer begin and end positions are invalid: ({first}, {last})")
            }
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Alignment(msg) => write!(f, "alignment failed: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
