//! RocksDB-backed persistent store for the coin set.
//!
//! [`CoinsDb`] is the terminal [`CoinsView`]: the bottom of every cache
//! stack. Spent coins arriving in a batch become key deletions, unspent coins
//! become key writes, and the best-block marker lands in the same atomic
//! write batch so a crash can never separate the coin set from the block it
//! is consistent with.

mod error;
mod obfuscation;

pub use self::error::Error;

use self::obfuscation::{Obfuscation, OBFUSCATION_KEY_BYTES};
use bitcache_coins::{key_to_outpoint, outpoint_to_key, Coin, CoinsCursor, CoinsView};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint};
use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::PathBuf;

/// Result type for coins database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Column family names.
mod cf {
    /// Coin records.
    /// Key: outpoint (txid || vout) = 36 bytes
    /// Value: bincode-encoded coin, obfuscated
    pub const COINS: &str = "coins";

    /// Metadata records.
    /// Keys: "best_block", "obfuscation_key"
    pub const META: &str = "meta";
}

/// Metadata keys.
mod meta_keys {
    pub const BEST_BLOCK: &[u8] = b"best_block";
    pub const OBFUSCATION_KEY: &[u8] = b"obfuscation_key";
}

/// Construction parameters for [`CoinsDb`].
#[derive(Debug, Clone)]
pub struct CoinsDbOptions {
    /// Directory holding the database files.
    pub path: PathBuf,
    /// Byte budget for the database's block cache.
    pub cache_bytes: usize,
}

/// The persistent coin set.
pub struct CoinsDb {
    db: DB,
    obfuscation: Obfuscation,
    best_block: RwLock<BlockHash>,
}

impl CoinsDb {
    /// Open or create the coins database under `options.path`.
    pub fn open(options: CoinsDbOptions) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuned for point lookups of small records under bursty batch writes.
        db_opts.set_write_buffer_size(64 * 1024 * 1024);
        db_opts.set_max_write_buffer_number(4);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(options.cache_bytes));
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(cf::COINS, Options::default()),
            ColumnFamilyDescriptor::new(cf::META, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&db_opts, &options.path, cf_descriptors)?;

        let obfuscation = Self::load_or_create_obfuscation(&db)?;
        let best_block = Self::load_best_block(&db)?;

        tracing::info!(
            "Opened coins database at {} (best block: {best_block})",
            options.path.display()
        );

        Ok(Self {
            db,
            obfuscation,
            best_block: RwLock::new(best_block),
        })
    }

    /// The key is generated once when the database is created; every later
    /// open must reuse it or stored values become unreadable.
    fn load_or_create_obfuscation(db: &DB) -> Result<Obfuscation> {
        let cf_meta = db.cf_handle(cf::META).ok_or(Error::NotInitialized)?;
        if let Some(bytes) = db.get_cf(cf_meta, meta_keys::OBFUSCATION_KEY)? {
            let key: [u8; OBFUSCATION_KEY_BYTES] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::CorruptMetadata("obfuscation key has wrong length"))?;
            return Ok(Obfuscation::new(key));
        }
        let obfuscation = Obfuscation::random();
        db.put_cf(cf_meta, meta_keys::OBFUSCATION_KEY, obfuscation.key_bytes())?;
        Ok(obfuscation)
    }

    fn load_best_block(db: &DB) -> Result<BlockHash> {
        let cf_meta = db.cf_handle(cf::META).ok_or(Error::NotInitialized)?;
        match db.get_cf(cf_meta, meta_keys::BEST_BLOCK)? {
            Some(bytes) => {
                let raw: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::CorruptMetadata("best block record has wrong length"))?;
                Ok(BlockHash::from_byte_array(raw))
            }
            None => Ok(BlockHash::all_zeros()),
        }
    }

    fn read_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        let cf_coins = self.db.cf_handle(cf::COINS).ok_or(Error::NotInitialized)?;
        match self.db.get_cf(cf_coins, outpoint_to_key(outpoint))? {
            Some(mut bytes) => {
                self.obfuscation.apply(&mut bytes);
                Ok(Some(bincode::deserialize(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn write_batch(&self, cursor: &mut CoinsCursor<'_>, best_block: BlockHash) -> Result<()> {
        let cf_coins = self.db.cf_handle(cf::COINS).ok_or(Error::NotInitialized)?;
        let cf_meta = self.db.cf_handle(cf::META).ok_or(Error::NotInitialized)?;

        let mut batch = WriteBatch::default();
        let mut written: u64 = 0;
        let mut erased: u64 = 0;
        while let Some(write) = cursor.next() {
            let key = outpoint_to_key(&write.outpoint);
            if write.coin.is_spent() {
                batch.delete_cf(cf_coins, key);
                erased += 1;
            } else {
                let mut value = bincode::serialize(&write.coin)?;
                self.obfuscation.apply(&mut value);
                batch.put_cf(cf_coins, key, value);
                written += 1;
            }
        }
        batch.put_cf(cf_meta, meta_keys::BEST_BLOCK, best_block.to_byte_array());

        // Atomic write
        self.db.write(batch)?;
        *self.best_block.write() = best_block;

        tracing::debug!(
            "Committed coins batch: {written} writes, {erased} erasures, best block {best_block}"
        );

        Ok(())
    }

    /// Every stored coin in key order. Meant for tooling and tests; the hot
    /// path is point lookups through [`CoinsView::coin`].
    pub fn coins(&self) -> Result<Vec<(OutPoint, Coin)>> {
        let cf_coins = self.db.cf_handle(cf::COINS).ok_or(Error::NotInitialized)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf_coins, rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            let key: [u8; 36] = key
                .as_ref()
                .try_into()
                .map_err(|_| Error::CorruptMetadata("coin key has wrong length"))?;
            let mut value = value.into_vec();
            self.obfuscation.apply(&mut value);
            out.push((key_to_outpoint(&key), bincode::deserialize(&value)?));
        }
        Ok(out)
    }
}

impl CoinsView for CoinsDb {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.read_coin(outpoint)
            .ok()
            .flatten()
            .filter(|coin| !coin.is_spent())
    }

    fn best_block(&self) -> BlockHash {
        *self.best_block.read()
    }

    fn batch_write(
        &self,
        cursor: &mut CoinsCursor<'_>,
        best_block: BlockHash,
    ) -> bitcache_coins::Result<()> {
        // A batch must land together with its consistency marker; arriving
        // here without one is a caller bug.
        if best_block == BlockHash::all_zeros() {
            return Err(bitcache_coins::Error::BestBlockUnset);
        }
        self.write_batch(cursor, best_block).map_err(Into::into)
    }

    fn estimate_size(&self) -> usize {
        self.db
            .property_int_value("rocksdb.estimate-live-data-size")
            .ok()
            .flatten()
            .unwrap_or(0) as usize
    }
}
