pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(String),

    #[error("annotation is not sorted: {chrom}:{start} follows {chrom}:{previous}")]
    UnsortedInput {
        chrom: String,
        start: u64,
        previous: u64,
    },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    /// I/O failures are handed back to the caller, who may retry; everything
    /// else means the input itself is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Format(_) => "FormatError",
            Error::UnsortedInput { .. } => "UnsortedInputError",
            Error::Parse { .. } => "ParseError",
            Error::Io(_) => "IOError",
            Error::Json(_) => "SerializationError",
            Error::Internal(_) => "InternalError",
        }
    }
}
