//! Dynamic memory usage arithmetic for cache accounting.
//!
//! The cache keeps a running total of the heap bytes charged by its coin
//! payloads; the helpers here make that total reproducible, so an independent
//! recomputation over the whole map lands on exactly the tracked value.

use crate::coin::Coin;
use std::collections::HashMap;
use std::mem;

/// Usable size of a heap allocation of `bytes`, assuming an allocator that
/// hands out 8-byte quanta for small blocks and 16-byte-aligned blocks above
/// that.
pub fn malloc_usage(bytes: usize) -> usize {
    if bytes == 0 {
        0
    } else if bytes <= 8 {
        8
    } else {
        (bytes + 15) & !15
    }
}

/// Heap cost of a coin's script payload. The inline fields ride along with
/// the owning map entry and are counted by [`map_usage`].
pub fn coin_usage(coin: &Coin) -> usize {
    malloc_usage(coin.script_pubkey.capacity())
}

/// Approximate heap footprint of the hash map's own table, excluding the coin
/// payloads tracked separately.
pub fn map_usage<K, V>(map: &HashMap<K, V>) -> usize {
    if map.capacity() == 0 {
        return 0;
    }
    // The table stores one control byte plus one (K, V) slot per bucket; the
    // bucket count is the reported capacity scaled back up by the 7/8 load
    // factor to the next power of two.
    let buckets = (map.capacity() * 8 / 7).next_power_of_two();
    malloc_usage(buckets * (mem::size_of::<(K, V)>() + 1))
}
