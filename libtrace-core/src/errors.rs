//! Basic error types shared by the whole workspace.
//!
//! Every fallible operation in the toolkit reports one of a small, closed set
//! of kinds. Backends raise `Io`/`Decode`, the pipeline raises
//! `Invalid`/`NotFound`, the cache raises `Exhausted` when every way of a set
//! is pinned, and the network layer raises `Protocol`.

/// Basic Error types.
#[derive(Debug)]
pub enum LtError {
    /// IoError from the std library.
    StdIoError(std::io::Error),
    /// TryFromSliceError from the std library.
    TryFromSlice(std::array::TryFromSliceError),
    /// A precondition violation.
    Invalid { msg: String },
    /// Index out of range, port unknown, trace absent.
    NotFound { msg: String },
    /// Malformed TLV header or compressed frame.
    Decode { msg: String },
    /// An allocation or buffer reservation was refused.
    Memory { msg: String },
    /// Network framing or command sequence error.
    Protocol { msg: String },
    /// No cache slot available for a store.
    Exhausted { msg: String },
    /// Enum creation error.
    ParseEnum { f: String, code: u16 },
    #[cfg(feature = "to_json")]
    /// Serialisation/Deserialisation error.
    SerdeError(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LtError>;

impl LtError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        LtError::Invalid { msg: msg.into() }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        LtError::NotFound { msg: msg.into() }
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        LtError::Decode { msg: msg.into() }
    }

    pub fn memory<S: Into<String>>(msg: S) -> Self {
        LtError::Memory { msg: msg.into() }
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        LtError::Protocol { msg: msg.into() }
    }

    pub fn exhausted<S: Into<String>>(msg: S) -> Self {
        LtError::Exhausted { msg: msg.into() }
    }
}

impl From<std::io::Error> for LtError {
    fn from(e: std::io::Error) -> Self {
        Self::StdIoError(e)
    }
}

impl From<std::array::TryFromSliceError> for LtError {
    fn from(e: std::array::TryFromSliceError) -> Self {
        Self::TryFromSlice(e)
    }
}

impl std::fmt::Display for LtError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use self::LtError::*;
        match self {
            StdIoError(x) => write!(fmt, "{}", x),
            TryFromSlice(x) => write!(fmt, "{}", x),
            Invalid { msg } => write!(fmt, "Invalid argument: {}", msg),
            NotFound { msg } => write!(fmt, "Not found: {}", msg),
            Decode { msg } => write!(fmt, "Decode error: {}", msg),
            Memory { msg } => write!(fmt, "Memory error: {}", msg),
            Protocol { msg } => write!(fmt, "Protocol error: {}", msg),
            Exhausted { msg } => write!(fmt, "Exhausted: {}", msg),
            ParseEnum { f, code } => write!(fmt, "Could not parse source ({}) to {}.", code, f),
            #[cfg(feature = "to_json")]
            SerdeError(x) => write!(fmt, "{}", x),
        }
    }
}

impl From<LtError> for String {
    fn from(e: LtError) -> String {
        e.to_string()
    }
}

impl std::error::Error for LtError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use self::LtError::*;
        match self {
            StdIoError(x) => x.source(),
            TryFromSlice(x) => x.source(),
            #[cfg(feature = "to_json")]
            SerdeError(x) => x.source(),
            _ => None,
        }
    }
}
