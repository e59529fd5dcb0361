use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::Location;

/// Broad classification of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input ran out before all required bits were consumed.
    InputUnderflow,
    /// The destination filled up before the declared output was produced.
    OutputOverflow,
    /// The input violates an invariant of the Zstandard format.
    Corruption,
    /// Not a Zstandard frame, or a frame feature this decoder rejects.
    UnsupportedFrame,
    /// The frame names a dictionary id that differs from the provided one.
    DictionaryMismatch,
}

#[derive(Debug)]
pub struct ZstdError {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub location: &'static Location<'static>,
}

pub type Res<T> = Result<T, ZstdError>;

impl Error for ZstdError {}

impl Display for ZstdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} at {}", self.kind, self.location)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?
        }
        Ok(())
    }
}

impl From<ZstdError> for std::io::Error {
    fn from(value: ZstdError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, value)
    }
}

impl From<ErrorBuilder> for ZstdError {
    #[track_caller]
    fn from(ErrorBuilder { kind, message }: ErrorBuilder) -> Self {
        Self {
            kind,
            message,
            location: Location::caller(),
        }
    }
}

/// Error-in-the-making produced by the low-level helpers. The `From`
/// conversion above runs at the `?` that surfaces it, so the recorded
/// location is the decode step that failed, not the helper.
#[derive(Debug)]
pub(crate) struct ErrorBuilder {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl ErrorBuilder {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message: Some(message),
        }
    }
}

/// Assert-style helpers for decode routines. Failed checks classify as
/// corruption unless raised with an explicit kind.
pub(crate) trait ErrorContext {
    fn raise<T>(&self, kind: ErrorKind, message: String) -> Result<T, ErrorBuilder> {
        Err(ErrorBuilder::new(kind, message))
    }

    fn corrupted<T>(&self, message: &str) -> Result<T, ErrorBuilder> {
        self.raise(ErrorKind::Corruption, message.into())
    }

    fn check(&self, v: bool, message: &str) -> Result<(), ErrorBuilder> {
        if v {
            Ok(())
        } else {
            self.corrupted(message)
        }
    }

    fn check_eq<T: PartialEq + Display>(&self, l: T, r: T) -> Result<(), ErrorBuilder> {
        if l == r {
            Ok(())
        } else {
            self.corrupted(&format!("expected {} == {}", l, r))
        }
    }

    fn check_le<T: PartialOrd + Display>(&self, l: T, r: T) -> Result<(), ErrorBuilder> {
        if l <= r {
            Ok(())
        } else {
            self.corrupted(&format!("expected {} <= {}", l, r))
        }
    }
}
