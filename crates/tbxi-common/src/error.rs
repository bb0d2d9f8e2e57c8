//! Shared dispatch-layer error type.
//!
//! Every container codec (`tbxi-supermario`, `tbxi-powerpc`, `tbxi-parcels`,
//! `tbxi-bootinfo`) exposes `probe_and_dump`/`build` functions returning
//! `Result<T, DispatchError>`. [`DispatchError::NotMine`] is the "wrong
//! format" sentinel the dispatcher uses to try the next codec in its fixed
//! order — it's a plain enum variant, never a panic, and the dispatcher is
//! the only code that matches on it specially.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Sentinel: this codec doesn't recognise the input. Caught by the
    /// dispatcher, never surfaced to a user.
    #[error("not this format")]
    NotMine,

    #[error("manifest parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("layout conflict at offset {offset:#x}: {message}")]
    Layout { offset: usize, message: String },

    #[error("missing component referenced by manifest: {0}")]
    MissingComponent(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("patch exited with unexpected code {0}")]
    PatchRejected(i32),

    #[error("{0}")]
    Codec(String),
}

impl DispatchError {
    pub fn is_not_mine(&self) -> bool {
        matches!(self, DispatchError::NotMine)
    }

    pub fn codec(message: impl Into<String>) -> Self {
        DispatchError::Codec(message.into())
    }
}

impl From<crate::manifest::ManifestError> for DispatchError {
    fn from(err: crate::manifest::ManifestError) -> Self {
        DispatchError::Codec(err.to_string())
    }
}
