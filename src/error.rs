use std::path::PathBuf;

/// Errors surfaced by the counter core. Everything here is reported to the caller as a value, the
/// binaries decide how to present it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A persisted mapping exists but can't be understood. Defaults are never substituted over it.
    #[error("configuration file {path:?} is corrupt: {reason}")]
    ConfigCorrupt { path: PathBuf, reason: String },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("counter storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("counter with key {0:?} already exists")]
    DuplicateKey(String),

    #[error("counter {0:?} is built in and can't be removed")]
    ProtectedDefinition(String),

    #[error("hotkey {0:?} is not a valid chord. Example of a valid chord: ctrl+1, alt+e")]
    InvalidChord(String),

    #[error("at most {limit} {what} are allowed")]
    CapacityExceeded { limit: usize, what: &'static str },

    #[error("invalid counter definition: {0}")]
    InvalidDefinition(&'static str),

    #[error("unknown counter {0:?}")]
    UnknownCounter(String),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::ConfigCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
