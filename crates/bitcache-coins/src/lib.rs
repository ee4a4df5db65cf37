//! Layered in-memory views over the UTXO set.
//!
//! The centerpiece is [`CoinsViewCache`], a write-back cache of coin records
//! keyed by outpoint. A cache sits on top of any other [`CoinsView`], whether
//! a persistent store or another cache, so views stack to arbitrary depth:
//! block connection mutates the topmost cache, reads fall through lazily, and
//! accumulated changes are periodically pushed down one level (or all the way
//! to disk) in a single batch.
//!
//! Each cached entry carries two propagation flags. *Dirty* entries differ
//! from the parent view and must be written back; *fresh* entries are known to
//! have no unspent counterpart below, so spending one simply deletes it
//! instead of writing a deletion record downward. The batch-write merge rules
//! in [`CoinsViewCache::batch_write`](CoinsView::batch_write) keep these flags
//! consistent across any stacking depth, including chain reorganizations and
//! the historic duplicate-coinbase blocks.

mod budget;
mod cache;
mod coin;
mod cursor;
mod entry;
mod error;
pub mod memusage;
mod update;
mod view;


pub use self::budget::{CacheSizes, DEFAULT_CACHE_BYTES};
pub use self::cache::CoinsViewCache;
pub use self::coin::{key_to_outpoint, outpoint_to_key, Coin};
pub use self::cursor::{CoinsCursor, CoinsWrite};
pub use self::error::Error;
pub use self::update::{
    add_transaction_outputs, apply_block, apply_transaction, first_unspent_output, undo_block,
    undo_coin, BlockUndo, TxUndo,
};
pub use self::view::CoinsView;

/// Result type for coins view operations.
pub type Result<T> = std::result::Result<T, Error>;
