//! Flush and sync behavior of cache stacks over the persistent store.

use bitcache_coins::{Coin, CoinsView, CoinsViewCache, Error};
use bitcache_coins_db::{CoinsDb, CoinsDbOptions};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};
use std::sync::Arc;

fn open_db(dir: &tempfile::TempDir) -> Arc<CoinsDb> {
    Arc::new(
        CoinsDb::open(CoinsDbOptions {
            path: dir.path().to_path_buf(),
            cache_bytes: 1 << 23,
        })
        .expect("open coins db"),
    )
}

fn block_hash(n: u8) -> BlockHash {
    BlockHash::from_byte_array([n.max(1); 32])
}

fn outpoint(n: u8) -> OutPoint {
    OutPoint {
        txid: Txid::from_byte_array([n; 32]),
        vout: 0,
    }
}

fn make_coin(value: u64) -> Coin {
    Coin::new(false, value, 4096, vec![0x51, 0x87, 0x02])
}

/// Flush (or sync) every cache, child-most first so changes ripple down to
/// the database. The best block is stamped beforehand the way block
/// connection normally does it.
fn flush_all(caches: &[Arc<CoinsViewCache>], erase: bool, tag: u8) {
    for (i, cache) in caches.iter().enumerate().rev() {
        cache.sanity_check();
        cache.set_best_block(block_hash(tag.wrapping_add(i as u8)));
        if erase {
            cache.flush().expect("flush succeeds");
        } else {
            cache.sync().expect("sync succeeds");
        }
    }
}

/// Exercise one cache of the stack through a full add / sync / flush / spend
/// cycle, watching the effects at every level.
fn check_flush_behavior(
    view: &Arc<CoinsViewCache>,
    base: &Arc<CoinsDb>,
    caches: &[Arc<CoinsViewCache>],
    do_erasing_flush: bool,
    salt: u8,
) {
    let out = outpoint(salt);
    let coin = make_coin(1_000 + u64::from(salt));

    assert!(!base.have_coin(&out));
    assert!(!view.have_coin(&out));

    // 1. Add a coin to the cache under test.
    view.add_coin(out, coin.clone(), false).expect("fresh add");
    let cache_usage = view.dynamic_memory_usage();
    let cache_size = view.cache_size();
    assert!(!base.have_coin(&out));
    assert!(view.have_coin(&out));

    // 2. A non-erasing sync pushes the coin down without evicting anything.
    flush_all(caches, false, salt);
    assert_eq!(view.dynamic_memory_usage(), cache_usage);
    assert_eq!(view.cache_size(), cache_size);
    assert!(base.have_coin(&out));
    assert!(view.have_coin(&out));

    if do_erasing_flush {
        // 3. An erasing flush empties the cache but loses nothing.
        flush_all(caches, true, salt);
        assert!(view.dynamic_memory_usage() <= cache_usage);
        assert!(view.cache_size() < cache_size);
        assert!(!view.have_coin_in_cache(&out));

        // Reading pulls the flushed coin back in as a read copy.
        assert_eq!(view.access_coin(&out), coin);
        assert!(view.have_coin_in_cache(&out));
    }

    // 4. Overwriting without declaring it is rejected.
    assert!(matches!(
        view.add_coin(out, coin.clone(), false),
        Err(Error::UnspentOverwrite(_))
    ));

    // 5. Spend the coin; the deletion reaches the database on the next sync.
    assert_eq!(view.spend_coin(&out), Some(coin));
    assert!(!view.have_coin(&out));
    assert!(base.have_coin(&out));

    flush_all(caches, false, salt);
    assert!(!view.have_coin(&out));
    assert!(!base.have_coin(&out));
    assert!(view.spend_coin(&out).is_none());
}

#[test]
fn flush_behavior_over_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = open_db(&dir);
    let lower = Arc::new(CoinsViewCache::new(base.clone()));
    let upper = Arc::new(CoinsViewCache::new(lower.clone()));
    let caches = [lower.clone(), upper.clone()];

    let mut salt = 1;
    for view in &caches {
        for do_erasing_flush in [false, true] {
            check_flush_behavior(view, &base, &caches, do_erasing_flush, salt);
            salt += 10;
        }
    }
}

/// A coin added to the database through one cache is spendable through a
/// sibling cache that has never seen it.
#[test]
fn coin_flows_between_sibling_caches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = open_db(&dir);
    let first = Arc::new(CoinsViewCache::new(base.clone()));
    let second = Arc::new(CoinsViewCache::new(base.clone()));

    let out = outpoint(0xaa);
    first
        .add_coin(out, make_coin(77), false)
        .expect("fresh add");
    first.set_best_block(block_hash(1));
    first.sync().expect("sync succeeds");
    assert!(base.have_coin(&out));
    assert!(first.have_coin(&out));
    assert!(!second.have_coin_in_cache(&out));

    assert!(second.spend_coin(&out).is_some());
    second.set_best_block(block_hash(2));
    second.sync().expect("sync succeeds");
    assert!(!base.have_coin(&out));
    assert!(!second.have_coin(&out));
}

/// Adding and spending without an intervening flush leaves no trace in the
/// database, even through a non-erasing sync.
#[test]
fn fresh_spend_never_reaches_the_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = open_db(&dir);
    let cache = Arc::new(CoinsViewCache::new(base.clone()));

    let out = outpoint(0xbb);
    cache
        .add_coin(out, make_coin(88), false)
        .expect("fresh add");
    assert!(!base.have_coin(&out));

    assert!(cache.spend_coin(&out).is_some());
    cache.set_best_block(block_hash(3));
    cache.sync().expect("sync succeeds");

    assert!(!cache.have_coin_in_cache(&out));
    assert!(!base.have_coin(&out));
    assert!(base.coins().expect("iterate").is_empty());
}

/// A duplicate coinbase overwrite followed by a spend leaves the outpoint
/// dead in the database instead of resurrecting the overwritten coin.
#[test]
fn duplicate_coinbase_tombstones_the_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = open_db(&dir);

    let out = outpoint(0xcc);
    let original = Coin::new(true, 50, 10, vec![0x51]);
    let duplicate = Coin::new(true, 50, 20, vec![0x51]);

    // Commit the original coinbase coin.
    {
        let cache = CoinsViewCache::new(base.clone());
        cache
            .add_coin(out, original, false)
            .expect("fresh add");
        cache.set_best_block(block_hash(4));
        cache.flush().expect("flush succeeds");
    }
    assert!(base.have_coin(&out));

    // Overwrite it with the duplicate, then spend. The overwrite entry must
    // not be treated as never-existing, or the spend would simply vanish and
    // leave the original alive below.
    let lower = Arc::new(CoinsViewCache::new(base.clone()));
    let upper = Arc::new(CoinsViewCache::new(lower.clone()));
    upper
        .add_coin(out, duplicate, true)
        .expect("duplicate coinbase add");
    assert!(upper.spend_coin(&out).is_some());

    for cache in [&upper, &lower] {
        cache.set_best_block(block_hash(5));
        cache.flush().expect("flush succeeds");
    }

    assert!(!base.have_coin(&out));
    assert!(base.coins().expect("iterate").is_empty());
    assert!(!upper.have_coin(&out));
    assert!(!lower.have_coin(&out));
}

/// The best block travels with each batch and survives reopening.
#[test]
fn best_block_rides_along_with_batches() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let base = open_db(&dir);
        assert_eq!(base.best_block(), BlockHash::all_zeros());

        let cache = CoinsViewCache::new(base.clone());
        cache
            .add_coin(outpoint(0xdd), make_coin(99), false)
            .expect("fresh add");
        cache.set_best_block(block_hash(6));
        cache.flush().expect("flush succeeds");
        assert_eq!(base.best_block(), block_hash(6));
    }

    let reopened = open_db(&dir);
    assert_eq!(reopened.best_block(), block_hash(6));
    assert!(reopened.have_coin(&outpoint(0xdd)));
}
