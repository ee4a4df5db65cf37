//! The layered in-memory cache over the coin set.

use crate::coin::Coin;
use crate::cursor::CoinsCursor;
use crate::entry::{CacheEntry, DIRTY, FRESH};
use crate::memusage;
use crate::view::CoinsView;
use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint};
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type CoinsMap = HashMap<OutPoint, CacheEntry>;

struct CacheInner {
    map: CoinsMap,
    /// Outpoints of entries carrying any flag. Kept alongside the map so a
    /// flush walks only the entries that need writing, in O(flagged).
    flagged: IndexSet<OutPoint>,
    /// Running total of the heap bytes charged by cached coin payloads.
    usage: usize,
    best_block: BlockHash,
}

impl CacheInner {
    /// Look up `outpoint` locally, pulling a read-through copy from `parent`
    /// on a miss. `None` when no view in the stack knows the coin.
    fn fetch(&mut self, parent: &dyn CoinsView, outpoint: &OutPoint) -> Option<&mut CacheEntry> {
        match self.map.entry(*outpoint) {
            MapEntry::Occupied(entry) => Some(entry.into_mut()),
            MapEntry::Vacant(vacant) => {
                let coin = parent.coin(outpoint)?;
                self.usage += memusage::coin_usage(&coin);
                Some(vacant.insert(CacheEntry::clean(coin)))
            }
        }
    }
}

/// An in-memory write-back cache of coin records over a parent [`CoinsView`].
///
/// Reads fall through to the parent lazily and keep a local flagless copy;
/// writes stay local until [`flush`](Self::flush) or [`sync`](Self::sync)
/// pushes them down in one batch. The cache owns its map and usage counter
/// exclusively; the parent must outlive it and is shared through an [`Arc`].
///
/// Dropping a cache without an erasing flush silently discards its unwritten
/// state. That is intentional when abandoning a speculative view, and on the
/// caller otherwise.
pub struct CoinsViewCache {
    parent: Arc<dyn CoinsView>,
    inner: RwLock<CacheInner>,
}

impl CoinsViewCache {
    /// Create an empty cache over `parent`.
    pub fn new(parent: Arc<dyn CoinsView>) -> Self {
        Self {
            parent,
            inner: RwLock::new(CacheInner {
                map: CoinsMap::default(),
                flagged: IndexSet::default(),
                usage: 0,
                best_block: BlockHash::all_zeros(),
            }),
        }
    }

    /// Coin lookup that also primes the cache: a hit anywhere in the stack is
    /// kept locally as a flagless read copy. Unknown outpoints yield the
    /// canonical spent coin and leave the cache untouched.
    pub fn access_coin(&self, outpoint: &OutPoint) -> Coin {
        let mut inner = self.inner.write();
        match inner.fetch(&*self.parent, outpoint) {
            Some(entry) => entry.coin.clone(),
            None => Coin::default(),
        }
    }

    /// Whether an unspent coin exists for `outpoint` anywhere in the stack,
    /// pulling it into this cache as a side effect.
    pub fn have_coin(&self, outpoint: &OutPoint) -> bool {
        let mut inner = self.inner.write();
        inner
            .fetch(&*self.parent, outpoint)
            .is_some_and(|entry| !entry.coin.is_spent())
    }

    /// Whether this cache itself holds an entry (spent or unspent) for
    /// `outpoint`. Never consults the parent, never inserts.
    pub fn have_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.inner.read().map.contains_key(outpoint)
    }

    /// Insert a newly created unspent coin.
    ///
    /// `possible_overwrite` must be set when an existing unspent coin at the
    /// same outpoint may legitimately be replaced (duplicate coinbase
    /// transactions); replacing one without it is an error. It also tells the
    /// cache that the parent may already hold a record for this outpoint, so
    /// a later spend must propagate downward instead of being dropped.
    ///
    /// Provably unspendable outputs are not worth tracking and are skipped.
    pub fn add_coin(&self, outpoint: OutPoint, coin: Coin, possible_overwrite: bool) -> Result<()> {
        debug_assert!(!coin.is_spent());
        if coin.is_unspendable() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        let CacheInner {
            map,
            flagged,
            usage,
            ..
        } = &mut *inner;
        let mut fresh = false;
        let entry = match map.entry(outpoint) {
            MapEntry::Vacant(vacant) => {
                fresh = !possible_overwrite;
                vacant.insert(CacheEntry::default())
            }
            MapEntry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if !possible_overwrite {
                    if !entry.coin.is_spent() {
                        return Err(Error::UnspentOverwrite(outpoint));
                    }
                    // A dirty spent entry records a spend the parent has not
                    // seen yet; the coin re-added over it (a reconnected
                    // block after a re-org) must keep propagating as an
                    // overwrite, so it cannot be marked fresh.
                    fresh = !entry.is_dirty();
                }
                *usage -= memusage::coin_usage(&entry.coin);
                entry
            }
        };
        tracing::trace!(
            "Cache add {outpoint}: value {}, height {}", coin.amount, coin.height
        );
        entry.coin = coin;
        entry.flags |= DIRTY | if fresh { FRESH } else { 0 };
        *usage += memusage::coin_usage(&entry.coin);
        flagged.insert(outpoint);
        Ok(())
    }

    /// Mark the coin at `outpoint` spent, pulling it from the parent first if
    /// needed. Returns the consumed coin, or `None` when nothing unspent was
    /// there.
    pub fn spend_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        let mut inner = self.inner.write();
        inner.fetch(&*self.parent, outpoint)?;
        let CacheInner {
            map,
            flagged,
            usage,
            ..
        } = &mut *inner;
        let entry = map.get_mut(outpoint).expect("entry was just fetched");
        *usage -= memusage::coin_usage(&entry.coin);
        tracing::trace!("Cache spend {outpoint}");
        let coin = if entry.is_fresh() {
            // Never existed below this cache; forget it outright instead of
            // recording a deletion.
            flagged.swap_remove(outpoint);
            let removed = map.remove(outpoint).expect("entry was just fetched");
            removed.coin
        } else {
            entry.flags |= DIRTY;
            flagged.insert(*outpoint);
            entry.coin.clear()
        };
        (!coin.is_spent()).then_some(coin)
    }

    /// Drop a flagless read copy to free memory. Entries carrying any flag
    /// hold unwritten state and are left alone; so are unknown outpoints.
    pub fn uncache(&self, outpoint: &OutPoint) {
        let mut inner = self.inner.write();
        if inner
            .map
            .get(outpoint)
            .is_some_and(|entry| entry.is_clean())
        {
            let entry = inner
                .map
                .remove(outpoint)
                .expect("entry was just looked up");
            inner.usage -= memusage::coin_usage(&entry.coin);
        }
    }

    /// Record the block hash the cached coin set is consistent with. Required
    /// before [`flush`](Self::flush) or [`sync`](Self::sync).
    pub fn set_best_block(&self, hash: BlockHash) {
        self.inner.write().best_block = hash;
    }

    /// Push every flagged entry down to the parent, moving coin payloads and
    /// emptying this cache on success.
    ///
    /// On failure the parent is in an unspecified partial state, and entries
    /// already streamed out of this cache have surrendered their payloads;
    /// treat both views as poisoned and do not retry.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let best_block = inner.best_block;
        if best_block == BlockHash::all_zeros() {
            return Err(Error::BestBlockUnset);
        }
        let entries = inner.map.len();
        let CacheInner {
            map,
            flagged,
            usage,
            ..
        } = &mut *inner;
        let keys: Vec<OutPoint> = flagged.drain(..).collect();
        let mut cursor = CoinsCursor::new(map, keys, usage, true);
        self.parent.batch_write(&mut cursor, best_block)?;
        inner.map.clear();
        inner.usage = 0;
        tracing::debug!("Flushed coins cache: {entries} entries released, best block {best_block}");
        Ok(())
    }

    /// Push every flagged entry down to the parent without evicting: on
    /// success the written entries stay behind as flagless read copies (spent
    /// entries, which make no read copy, are dropped).
    ///
    /// Same failure contract as [`flush`](Self::flush).
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let best_block = inner.best_block;
        if best_block == BlockHash::all_zeros() {
            return Err(Error::BestBlockUnset);
        }
        let CacheInner {
            map,
            flagged,
            usage,
            ..
        } = &mut *inner;
        let keys: Vec<OutPoint> = flagged.drain(..).collect();
        let mut cursor = CoinsCursor::new(map, keys, usage, false);
        self.parent.batch_write(&mut cursor, best_block)
    }

    /// Bytes of heap charged to this cache: coin payloads plus the map's own
    /// table.
    pub fn dynamic_memory_usage(&self) -> usize {
        let inner = self.inner.read();
        memusage::map_usage(&inner.map) + inner.usage
    }

    /// Number of entries currently cached.
    pub fn cache_size(&self) -> usize {
        self.inner.read().map.len()
    }

    /// Verify internal consistency: flag invariants, flag tracking and the
    /// usage counter against a full recomputation. Panics on violation; meant
    /// for tests and debugging.
    pub fn sanity_check(&self) {
        let inner = self.inner.read();
        let mut recomputed = 0;
        for (outpoint, entry) in &inner.map {
            assert!(
                !entry.is_fresh() || entry.is_dirty(),
                "fresh entry without dirty: {outpoint}"
            );
            assert_eq!(
                inner.flagged.contains(outpoint),
                !entry.is_clean(),
                "flag tracking out of sync: {outpoint}"
            );
            recomputed += memusage::coin_usage(&entry.coin);
        }
        for outpoint in &inner.flagged {
            assert!(
                inner.map.contains_key(outpoint),
                "flagged outpoint missing from the map: {outpoint}"
            );
        }
        assert_eq!(recomputed, inner.usage, "usage counter out of sync");
    }
}

impl CoinsView for CoinsViewCache {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        let mut inner = self.inner.write();
        inner
            .fetch(&*self.parent, outpoint)
            .filter(|entry| !entry.coin.is_spent())
            .map(|entry| entry.coin.clone())
    }

    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        CoinsViewCache::have_coin(self, outpoint)
    }

    fn best_block(&self) -> BlockHash {
        self.inner.read().best_block
    }

    fn batch_write(&self, cursor: &mut CoinsCursor<'_>, best_block: BlockHash) -> Result<()> {
        let mut inner = self.inner.write();
        let CacheInner {
            map,
            flagged,
            usage,
            ..
        } = &mut *inner;
        while let Some(write) = cursor.next() {
            match map.entry(write.outpoint) {
                MapEntry::Vacant(vacant) => {
                    // A spent child entry that never existed below needs no
                    // deletion record here either.
                    if !(write.fresh && write.coin.is_spent()) {
                        *usage += memusage::coin_usage(&write.coin);
                        let flags = DIRTY | if write.fresh { FRESH } else { 0 };
                        vacant.insert(CacheEntry {
                            coin: write.coin,
                            flags,
                        });
                        flagged.insert(write.outpoint);
                    }
                }
                MapEntry::Occupied(mut occupied) => {
                    if write.fresh && !occupied.get().coin.is_spent() {
                        return Err(Error::FreshMisapplied(write.outpoint));
                    }
                    if occupied.get().is_fresh() && write.coin.is_spent() {
                        // No view below this one ever saw the coin; the spend
                        // cancels the pending insert.
                        *usage -= memusage::coin_usage(&occupied.get().coin);
                        flagged.swap_remove(&write.outpoint);
                        occupied.remove();
                    } else {
                        let entry = occupied.into_mut();
                        *usage -= memusage::coin_usage(&entry.coin);
                        entry.coin = write.coin;
                        *usage += memusage::coin_usage(&entry.coin);
                        entry.flags |= DIRTY;
                        flagged.insert(write.outpoint);
                    }
                }
            }
        }
        if best_block != BlockHash::all_zeros() {
            inner.best_block = best_block;
        }
        Ok(())
    }

    fn estimate_size(&self) -> usize {
        self.parent.estimate_size()
    }
}

#[cfg(test)]
impl CoinsViewCache {
    /// Plant an entry with an arbitrary flag combination, bypassing the
    /// public operations.
    pub(crate) fn insert_entry(&self, outpoint: OutPoint, coin: Coin, flags: u8) {
        let mut inner = self.inner.write();
        inner.usage += memusage::coin_usage(&coin);
        inner.map.insert(outpoint, CacheEntry { coin, flags });
        if flags != 0 {
            inner.flagged.insert(outpoint);
        }
    }

    /// The entry's coin and flags, if present.
    pub(crate) fn entry(&self, outpoint: &OutPoint) -> Option<(Coin, u8)> {
        self.inner
            .read()
            .map
            .get(outpoint)
            .map(|entry| (entry.coin.clone(), entry.flags))
    }

    /// Number of entries currently flagged.
    pub(crate) fn flagged_count(&self) -> usize {
        self.inner.read().flagged.len()
    }

    /// Assert only that the usage counter matches a recomputation, without
    /// the flag-invariant checks (some tests plant flag states the public
    /// operations can never produce).
    pub(crate) fn check_usage(&self) {
        let inner = self.inner.read();
        let recomputed: usize = inner
            .map
            .values()
            .map(|entry| memusage::coin_usage(&entry.coin))
            .sum();
        assert_eq!(recomputed, inner.usage, "usage counter out of sync");
    }
}
