//! Error taxonomy for the EXI processor.
//!
//! `rscil` propagates bare [`std::io::Error`] everywhere; that is too coarse
//! for EXI, whose failures need a taxonomy (§7) plus the stream position at
//! which they were detected. [`ExiError`] carries both.

use std::fmt;

/// A logical cursor into a byte buffer: a byte offset plus a within-byte bit
/// offset in `[0..8)`. Mirrors the position pair returned by
/// [`crate::stream::BitReader::tell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPosition {
    pub byte: usize,
    pub bit: u8,
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "byte {}, bit {}", self.byte, self.bit)
    }
}

/// The EXI error taxonomy (§7).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExiErrorKind {
    // IO
    #[error("unexpected end of stream")]
    EndOfStream,
    #[error("short write: buffer rejected {0} bytes")]
    ShortWrite(usize),
    #[error("need more input to continue")]
    NeedMoreInput,

    // Header
    #[error("malformed cookie: expected '$EXI', found byte {0:#x}")]
    MalformedCookie(u8),
    #[error("bad distinguishing bits: {0:#04b}")]
    BadDistinguishingBits(u8),
    #[error("unsupported EXI version {0}")]
    UnsupportedVersion(u32),
    #[error("preview EXI versions are not supported")]
    PreviewVersionRejected,
    #[error("options were not provided in-band and none were supplied out-of-band")]
    OptionsMissing,
    #[error("options block was invalid: {0}")]
    OptionsInvalid(String),

    // Options invariants
    #[error("compression requires pre-compression alignment")]
    AlignmentCompressionMismatch,
    #[error("strict mode forbids this combination of preserve/self-contained options")]
    StrictViolation,
    #[error("a datatype representation map requires a schema id and no lexical-value preservation")]
    DatatypeMapRequiresSchema,
    #[error("self-contained regions cannot be used with pre-compression alignment")]
    SelfContainedWithPreCompression,

    // Primitives
    #[error("unsigned integer exceeded the 10-octet limit")]
    NumericOverflow,
    #[error("invalid UTF-8 in string literal")]
    InvalidUtf8,
    #[error("string length prefix did not match decoded scalar count")]
    LengthMismatch,

    // Grammar
    #[error("event code did not address a valid production")]
    GrammarViolation,
    #[error("EE encountered with an empty grammar stack")]
    UnexpectedEE,
    #[error("a strict-mode-forbidden production was encountered")]
    StrictProductionForbidden,
    #[error("self-contained element decoding is not supported")]
    SelfContainedUnsupported,

    // Tables
    #[error("compact ID {0} is out of range for a partition of size {1}")]
    CompactIdOutOfRange(u64, u64),
    #[error("FIFO eviction underflow: partition was empty")]
    EvictionUnderflow,

    // User
    #[error("serializer callback reported an error: {0}")]
    SerializerError(String),
}

/// A located, optionally-annotated [`ExiErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at {position}{}", context.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct ExiError {
    pub kind: ExiErrorKind,
    pub position: StreamPosition,
    pub context: Option<String>,
}

impl ExiError {
    pub fn new(kind: ExiErrorKind, position: StreamPosition) -> Self {
        Self { kind, position, context: None }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Builds an error with no known position, e.g. before any stream exists.
    pub fn at_start(kind: ExiErrorKind) -> Self {
        Self::new(kind, StreamPosition::default())
    }
}

impl From<std::io::Error> for ExiError {
    fn from(err: std::io::Error) -> Self {
        ExiError::at_start(ExiErrorKind::EndOfStream).with_context(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExiError>;
