use std::{borrow::Cow, fmt::Display};

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// An option was missing, unrecognized, or conflicted with another option.
    ///
    /// Surfaced before any I/O is attempted.
    Configuration,

    /// An existing manifest's `collection`/`format`/`compression`/`query_digest`
    /// disagreed with the current invocation and `resume_overwrite_incompatible`
    /// was not set.
    IncompatibleResume,

    /// The requested compression codec could not be provided at all (as
    /// opposed to a zstd -> gzip downgrade, which is a warning, not an error).
    CodecUnavailable,

    /// A cursor or network operation against the collection failed.
    Cursor,

    /// Partition planning failed. Per spec, this is always fatal; no partial
    /// plan is ever returned.
    Partitioner,

    /// A writer or filesystem operation failed.
    Writer,

    /// The manifest file could not be read, parsed, or atomically replaced.
    Manifest,

    /// An invariant the engine depends on did not hold. Indicates a bug.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "invalid configuration"),
            ErrorKind::IncompatibleResume => write!(f, "incompatible resume"),
            ErrorKind::CodecUnavailable => write!(f, "compression codec unavailable"),
            ErrorKind::Cursor => write!(f, "cursor error"),
            ErrorKind::Partitioner => write!(f, "partitioner error"),
            ErrorKind::Writer => write!(f, "writer error"),
            ErrorKind::Manifest => write!(f, "manifest error"),
            ErrorKind::Internal => write!(f, "internal snapshot engine error"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync>> {
        self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        ErrorKind::Writer.with_source(err)
    }
}
