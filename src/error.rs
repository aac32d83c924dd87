use std::error::Error as StdError;
use std::fmt::{self, Display};

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error taxonomy for the streaming encoder.
///
/// No partial recovery: once any variant reaches the output stream, no
/// further bytes are produced and the archive is not a valid ZIP.
#[derive(Debug, Error)]
pub enum ZipError {
    /// External abort or consumer cancellation.
    #[error("zip stream aborted{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Aborted { reason: Option<String> },

    /// Mismatched `last_part_size`, unsupported item shape, or a declared
    /// size contradicted by the drained byte count.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The underlying byte source for an entry errored mid-drain.
    #[error("byte source failed: {0}")]
    SourceFailure(#[source] BoxError),

    /// The caller-supplied entry iterator errored.
    #[error("entry iterator failed: {0}")]
    IteratorFailure(#[source] BoxError),
}

impl ZipError {
    pub fn aborted(reason: Option<String>) -> Self {
        ZipError::Aborted { reason }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ZipError::Aborted { .. })
    }
}

/// Helper for displaying an error together with its full source chain,
/// one cause per line.
pub struct Report<T>(pub T);

impl<T: StdError> Display for Report<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut error: &dyn StdError = &self.0;

        write!(f, "{error}")?;

        while let Some(source) = error.source() {
            write!(f, "\n  : {source}")?;
            error = source;
        }

        Ok(())
    }
}
