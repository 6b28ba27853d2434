//! Error type shared by every conversion and operator call.
//!
//! There are exactly three failure families:
//! - [`ErrorKind::UnsupportedType`]: a type or shape has no encoding/conversion rule.
//! - [`ErrorKind::NativeOperationFailure`]: the native engine reported an error.
//! - [`ErrorKind::ShapeMismatch`]: lengths or buffer counts disagree between what one
//!   side produced and the other consumed.
//!
//! None of them are retried inside this crate.

use std::error::Error;
use std::fmt;

/// Error raised by the boundary layer.
#[derive(Debug, Clone)]
pub struct BridgeError {
    pub message: String,
    pub kind: ErrorKind,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedType,
    NativeOperationFailure,
    ShapeMismatch,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ErrorKind::UnsupportedType => "TypeError",
            ErrorKind::NativeOperationFailure => "RuntimeError",
            ErrorKind::ShapeMismatch => "ShapeMismatch",
        };
        write!(f, "{label}: {}", self.message)?;
        if let Some(src) = &self.source {
            write!(f, " (in {src})")?;
        }
        Ok(())
    }
}

impl Error for BridgeError {}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedType, message)
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShapeMismatch, message)
    }

    /// Wrap a native-side failure, keeping the whole error chain as text.
    pub fn native(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::NativeOperationFailure, format!("{err:#}"))
    }

    /// Name the boundary entry point the error came from.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        self.kind == ErrorKind::UnsupportedType
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Convert a native `anyhow` result into a [`BridgeResult`], tagging the entry point.
pub(crate) trait NativeResultExt<T> {
    fn native_ctx(self, entry: &str) -> BridgeResult<T>;
}

impl<T> NativeResultExt<T> for anyhow::Result<T> {
    fn native_ctx(self, entry: &str) -> BridgeResult<T> {
        self.map_err(|e| BridgeError::native(&e).with_source(entry))
    }
}
