//! Error types for the coins views.

use bitcoin::OutPoint;

/// Errors that can occur while reading or writing coins views.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A child cache claimed `FRESH` for a coin the parent holds unspent.
    ///
    /// This is a logic error in whoever set the flag, never a data condition.
    #[error("FRESH flag misapplied to coin {0} that exists in parent cache")]
    FreshMisapplied(OutPoint),

    /// The view has nowhere to write a batch to.
    #[error("Coins view does not support batch writes")]
    BatchWriteUnsupported,

    /// Reading from the backing store failed and the process must not continue.
    #[error("Unrecoverable error reading from coins database: {0}")]
    UnrecoverableRead(String),

    /// A transaction input refers to a coin that is missing or already spent.
    #[error("Missing input: {0}")]
    MissingInput(OutPoint),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend specific failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Returns `true` if the error must bring the node down instead of being handled.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FreshMisapplied(_) | Self::UnrecoverableRead(_))
    }
}
