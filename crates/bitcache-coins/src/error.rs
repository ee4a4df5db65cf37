//! Error types for the coins view stack.

use bitcoin::OutPoint;

/// Errors surfaced by the coins cache and its backing views.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A coin was added over an existing unspent coin without declaring the
    /// overwrite as intentional. Indicates a programming error in the caller.
    #[error("attempted to overwrite unspent coin {0}")]
    UnspentOverwrite(OutPoint),

    /// A child entry marked fresh met an unspent coin in the parent view
    /// during a batch write. The flag machinery was corrupted somewhere below;
    /// the whole batch is abandoned.
    #[error("fresh coin {0} collides with an unspent coin in the parent view")]
    FreshMisapplied(OutPoint),

    /// A flushing operation ran before the view's best block was set.
    #[error("best block must be set before flushing")]
    BestBlockUnset,

    /// An input of the transaction being connected is missing or already
    /// spent.
    #[error("missing or already spent input {0}")]
    MissingInput(OutPoint),

    /// An undo coin carried no height metadata and no sibling output was left
    /// to recover it from.
    #[error("undo data for {0} carries no height metadata")]
    MissingUndoMetadata(OutPoint),

    /// Transaction and undo data do not describe the same spends.
    #[error("transaction and undo data inconsistent")]
    UndoDataMismatch,

    /// The backing store rejected a batch write. The views above it are in an
    /// unspecified partial state and must not be reused.
    #[error("coins backend error: {0}")]
    Backend(String),
}
