//! The capability set shared by every view of the coin set.

use crate::coin::Coin;
use crate::cursor::CoinsCursor;
use crate::Result;
use bitcoin::{BlockHash, OutPoint};

/// A readable, batch-writable view of the coin set.
///
/// Implemented by the in-memory [`CoinsViewCache`](crate::CoinsViewCache),
/// which is how caches stack to arbitrary depth, and by persistent terminal
/// stores. All methods take `&self`; implementations guard their own interior
/// state, and callers serialize mutation of any one chain of views.
pub trait CoinsView: Send + Sync {
    /// Look up the unspent coin for `outpoint`, if any.
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// Whether an unspent coin exists for `outpoint`.
    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.coin(outpoint).is_some()
    }

    /// The block hash at which this view's coin set is consistent. The zero
    /// hash means the best block is not known yet.
    fn best_block(&self) -> BlockHash;

    /// Absorb a batch of coin changes pulled from a child cache's cursor.
    ///
    /// A zero `best_block` means "leave the stored best block unchanged";
    /// persistent terminal stores reject it instead, since their batches must
    /// always land together with a consistency marker.
    fn batch_write(&self, cursor: &mut CoinsCursor<'_>, best_block: BlockHash) -> Result<()>;

    /// Estimate of the on-disk size of this view, in bytes. Zero when unknown
    /// or purely in-memory.
    fn estimate_size(&self) -> usize {
        0
    }
}
