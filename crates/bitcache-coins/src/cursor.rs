//! One-shot cursor over the flagged entries of a cache, handed to the parent
//! view during a batch write.

use crate::coin::Coin;
use crate::entry::CacheEntry;
use crate::memusage;
use bitcoin::OutPoint;
use std::collections::HashMap;

/// A single coin change pulled from a child cache. Spent coins are deletion
/// records; unspent coins are upserts.
#[derive(Debug)]
pub struct CoinsWrite {
    pub outpoint: OutPoint,
    /// The child's version of the coin.
    pub coin: Coin,
    /// The child asserts that no view below the parent holds an unspent
    /// record for this outpoint.
    pub fresh: bool,
}

/// Streams the dirty entries of a child cache to its parent exactly once.
///
/// The child decides up front whether the write erases (coin payloads are
/// moved out and the child map is emptied on completion) or copies (entries
/// stay behind as flagless read copies). Either way the cursor finalizes each
/// source entry as it advances, so iterating over the flagged subset stays
/// O(flagged) regardless of the map size.
pub struct CoinsCursor<'a> {
    map: &'a mut HashMap<OutPoint, CacheEntry>,
    flagged: std::vec::IntoIter<OutPoint>,
    usage: &'a mut usize,
    will_erase: bool,
}

impl<'a> CoinsCursor<'a> {
    pub(crate) fn new(
        map: &'a mut HashMap<OutPoint, CacheEntry>,
        flagged: Vec<OutPoint>,
        usage: &'a mut usize,
        will_erase: bool,
    ) -> Self {
        Self {
            map,
            flagged: flagged.into_iter(),
            usage,
            will_erase,
        }
    }

    /// Whether the child will drop its entries once the write completes. Coin
    /// payloads are moved instead of copied when it will.
    pub fn will_erase(&self) -> bool {
        self.will_erase
    }
}

impl Iterator for CoinsCursor<'_> {
    type Item = CoinsWrite;

    fn next(&mut self) -> Option<CoinsWrite> {
        loop {
            let outpoint = self.flagged.next()?;
            let Some(entry) = self.map.get_mut(&outpoint) else {
                continue;
            };
            let dirty = entry.is_dirty();
            let fresh = entry.is_fresh();
            let coin = if self.will_erase {
                // Moved into the parent; the hollowed entry goes away when the
                // erasing flush clears the whole map on completion.
                entry.coin.clear()
            } else if entry.coin.is_spent() {
                // A spent entry is useless as a read copy; take it out now.
                let entry = self
                    .map
                    .remove(&outpoint)
                    .expect("entry was just looked up");
                *self.usage -= memusage::coin_usage(&entry.coin);
                entry.coin
            } else {
                entry.flags = 0;
                entry.coin.clone()
            };
            if dirty {
                return Some(CoinsWrite {
                    outpoint,
                    coin,
                    fresh,
                });
            }
            // Entries flagged but not dirty carry nothing the parent needs;
            // they are finalized like the rest and skipped.
        }
    }
}
