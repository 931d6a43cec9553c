use std::io;

use thiserror::Error;

/// Errors reported by model I/O and option validation.
///
/// Unknown tokens are never errors; they are skipped during training.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input was readable but its content does not describe a model.
    #[error("malformed input: {context}")]
    Malformed { context: String },

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("invalid training options: {0}")]
    InvalidOptions(String),
}

impl Error {
    pub(crate) fn malformed(context: impl Into<String>) -> Self {
        Error::Malformed {
            context: context.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
