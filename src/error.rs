// Error taxonomy for the keyboard-layout and code-page engine. Every
// parser in this crate reports failure through KeybError. The variants
// mirror the legacy KEYB_* status codes the host-level API surface
// (load_layout, switch_layout) is expected to translate to.

use std::fmt;

// Result alias used throughout the crate's loaders and parsers.
pub type Result<T> = std::result::Result<T, KeybError>;

// translate_key never returns this: unknown scan codes, zero table
// entries, and exhausted dead-key tables all silently fall through to
// pass-through behaviour.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeybError {
    // Neither a .KL/.KCL file nor an embedded blob contains the
    // requested layout id.
    #[error("layout or code-page resource not found: {0}")]
    FileNotFound(String),

    // Magic mismatch, truncated record, or an offset fell outside the
    // buffer while parsing a KL or KCL file.
    #[error("malformed KL/KCL file: {0}")]
    InvalidFile(String),

    // The file parsed cleanly but no submapping matches the requested
    // code page and no wildcard submapping exists.
    #[error("layout has no submapping for the requested code page: {0}")]
    LayoutNotFound(String),

    // A CPI/CPX file failed signature checks, decompression, or no
    // chained entry matches the requested code page.
    #[error("malformed or unsupported code-page file: {0}")]
    InvalidCPFile(String),
}

impl KeybError {
    // Maps to the legacy KEYB_* numeric status code, for callers that
    // bridge this crate's Result back into a C-style status value.
    pub fn code(&self) -> i32 {
        match self {
            KeybError::FileNotFound(_) => 1,
            KeybError::InvalidFile(_) => 2,
            KeybError::LayoutNotFound(_) => 3,
            KeybError::InvalidCPFile(_) => 4,
        }
    }
}

// KEYB_NOERROR has no payload; this newtype lets call sites that want
// the full legacy four-valued-plus-success status spell it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeybStatus {
    NoError,
    Failed(KeybErrorKind),
}

// Discriminant-only view of KeybError, used where callers want to match
// on the kind without cloning the descriptive payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeybErrorKind {
    FileNotFound,
    InvalidFile,
    LayoutNotFound,
    InvalidCPFile,
}

impl From<&KeybError> for KeybErrorKind {
    fn from(e: &KeybError) -> Self {
        match e {
            KeybError::FileNotFound(_) => KeybErrorKind::FileNotFound,
            KeybError::InvalidFile(_) => KeybErrorKind::InvalidFile,
            KeybError::LayoutNotFound(_) => KeybErrorKind::LayoutNotFound,
            KeybError::InvalidCPFile(_) => KeybErrorKind::InvalidCPFile,
        }
    }
}

impl fmt::Display for KeybStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeybStatus::NoError => write!(f, "KEYB_NOERROR"),
            KeybStatus::Failed(kind) => write!(f, "{:?}", kind),
        }
    }
}
