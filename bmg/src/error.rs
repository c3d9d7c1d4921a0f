use thiserror::Error;

/// Every fallible entry point in this crate returns one of these. Decode paths are
/// permissive (most anomalies become a [`Diagnostic`] rather than an `Err`); encode
/// paths are strict, per the codec's documented error-handling policy.
#[derive(Debug, Error)]
pub enum BmgError {
    #[error("invalid magic byte sequence in BMG header, expected \"MESGbmg1\" or \"#BMG\"")]
    InvalidMagic,

    #[error("BMG section claims size {claimed} but only {available} bytes remain")]
    TruncatedSection { claimed: u32, available: u32 },

    #[error("unrecognized BMG text encoding byte {0:#04x}")]
    UnsupportedEncoding(u8),

    #[error("inf_size {0} is out of the supported range [4, 1000]")]
    InfSizeOutOfRange(u32),

    #[error("invalid section magic (expected 4 ASCII bytes)")]
    InvalidSectionMagic,

    #[error("regex engine failed to compile pattern: {0}")]
    RegexCompileError(String),

    #[error("invalid hex literal in text form: {0}")]
    InvalidHex(String),

    #[error("unexpected end of input while scanning text form at line {0}")]
    UnexpectedEof(usize),

    #[error("malformed directive on line {line}: {message}")]
    MalformedDirective { line: usize, message: String },

    #[error("malformed message line {line}: {message}")]
    MalformedMessage { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Non-fatal anomaly surfaced during a permissive decode. Callers can inspect these
/// without having to scrape the log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Byte offset in the source buffer the diagnostic pertains to, if known.
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Info,
}

impl Diagnostic {
    pub fn warn(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, message: message.into(), offset: None }
    }

    pub fn warn_at(message: impl Into<String>, offset: usize) -> Self {
        Diagnostic { severity: Severity::Warning, message: message.into(), offset: Some(offset) }
    }
}

/// Result of a decode: the store plus whatever non-fatal anomalies were observed
/// along the way (see [`BmgError`]'s module docs for the permissive/strict split).
#[derive(Debug, Default, Clone)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, d: Diagnostic) {
        match d.severity {
            Severity::Warning => log::warn!("{}", d.message),
            Severity::Info => log::info!("{}", d.message),
        }
        self.0.push(d);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Bmg(#[from] BmgError),

    #[error("regex pipeline error: {0}")]
    Regex(String),

    #[error("patch command {0} requires a source store")]
    MissingSource(String),
}
