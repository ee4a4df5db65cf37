//! Connecting and disconnecting transactions against a coins cache.

use crate::cache::CoinsViewCache;
use crate::coin::Coin;
use crate::{Error, Result};
use bitcoin::{Block, BlockHash, OutPoint, Transaction, Txid};

/// Upper bound on outputs a single block can carry: the block weight limit
/// over the weight of the smallest serializable transaction.
const MAX_OUTPUTS_PER_BLOCK: u32 = 4_000_000 / 240;

/// Undo payload for one transaction: the coins its inputs consumed, in input
/// order.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TxUndo {
    pub spent_coins: Vec<Coin>,
}

/// Undo payload for a whole block, one entry per transaction after the
/// coinbase.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BlockUndo {
    pub tx_undos: Vec<TxUndo>,
}

/// Spend all inputs of `tx` and create its outputs at `height`.
pub fn apply_transaction(cache: &CoinsViewCache, tx: &Transaction, height: u32) -> Result<TxUndo> {
    let mut undo = TxUndo::default();
    if !tx.is_coinbase() {
        undo.spent_coins.reserve(tx.input.len());
        for input in &tx.input {
            let coin = cache
                .spend_coin(&input.previous_output)
                .ok_or(Error::MissingInput(input.previous_output))?;
            undo.spent_coins.push(coin);
        }
    }
    add_transaction_outputs(cache, tx, height)?;
    Ok(undo)
}

/// Create the outputs of `tx` at `height` without touching its inputs.
///
/// Coinbase outputs are inserted with overwrite allowed: two historic chains
/// of blocks carry duplicate coinbase transactions whose later copy replaces
/// the earlier one.
pub fn add_transaction_outputs(cache: &CoinsViewCache, tx: &Transaction, height: u32) -> Result<()> {
    let is_coinbase = tx.is_coinbase();
    let txid = tx.compute_txid();
    for (vout, output) in tx.output.iter().enumerate() {
        let outpoint = OutPoint {
            txid,
            vout: vout as u32,
        };
        if is_coinbase && cache.have_coin(&outpoint) {
            tracing::warn!("Duplicate coinbase output {outpoint} at height {height}, overwriting");
        }
        cache.add_coin(outpoint, Coin::from_txout(output, height, is_coinbase), is_coinbase)?;
    }
    Ok(())
}

/// Restore `coin` at `outpoint` while disconnecting a block.
///
/// Returns `false` when the undo was applied over unexpected data (an
/// existing unspent coin got overwritten), which callers treat as a
/// damaged-chainstate signal rather than a hard error.
pub fn undo_coin(cache: &CoinsViewCache, outpoint: &OutPoint, mut coin: Coin) -> Result<bool> {
    let clean = !cache.have_coin(outpoint);
    if coin.height == 0 {
        // Legacy undo records carry metadata only on the last spend of a
        // transaction; borrow it from a sibling output still unspent.
        let Some(alternate) = first_unspent_output(cache, &outpoint.txid) else {
            return Err(Error::MissingUndoMetadata(*outpoint));
        };
        coin.height = alternate.height;
        coin.is_coinbase = alternate.is_coinbase;
    }
    cache.add_coin(*outpoint, coin, !clean)?;
    Ok(clean)
}

/// Connect `block` at `height`, recording everything needed to disconnect it
/// again. Updates the cache's best block on success.
pub fn apply_block(cache: &CoinsViewCache, block: &Block, height: u32) -> Result<BlockUndo> {
    let mut undo = BlockUndo::default();
    for (i, tx) in block.txdata.iter().enumerate() {
        let tx_undo = apply_transaction(cache, tx, height)?;
        if i > 0 {
            undo.tx_undos.push(tx_undo);
        }
    }
    cache.set_best_block(block.block_hash());
    Ok(undo)
}

/// Disconnect `block`, restoring the coins its transactions consumed and
/// rewinding the best block to `prev_hash`.
///
/// Returns `false` when the cached state did not line up with the undo data
/// everywhere; the disconnect still completes.
pub fn undo_block(
    cache: &CoinsViewCache,
    block: &Block,
    height: u32,
    undo: &BlockUndo,
    prev_hash: BlockHash,
) -> Result<bool> {
    if undo.tx_undos.len() + 1 != block.txdata.len() {
        return Err(Error::UndoDataMismatch);
    }
    let mut clean = true;
    for (i, tx) in block.txdata.iter().enumerate().rev() {
        let txid = tx.compute_txid();

        // Take back the outputs this transaction created. A missing one means
        // the cache and the undo data disagree.
        for (vout, output) in tx.output.iter().enumerate() {
            let coin = Coin::from_txout(output, height, tx.is_coinbase());
            // Unspendable outputs were never added, so there is nothing to
            // take back; skip them on the same predicate the add used.
            if coin.is_unspendable() {
                continue;
            }
            let outpoint = OutPoint {
                txid,
                vout: vout as u32,
            };
            clean &= cache
                .spend_coin(&outpoint)
                .is_some_and(|spent| spent == coin);
        }

        if i > 0 {
            let tx_undo = &undo.tx_undos[i - 1];
            if tx_undo.spent_coins.len() != tx.input.len() {
                return Err(Error::UndoDataMismatch);
            }
            for (input, coin) in tx.input.iter().zip(&tx_undo.spent_coins).rev() {
                clean &= undo_coin(cache, &input.previous_output, coin.clone())?;
            }
        }
    }
    cache.set_best_block(prev_hash);
    Ok(clean)
}

/// Scan the output indexes of `txid` from zero and return the first coin
/// still unspent, if any.
pub fn first_unspent_output(cache: &CoinsViewCache, txid: &Txid) -> Option<Coin> {
    (0..MAX_OUTPUTS_PER_BLOCK).find_map(|vout| {
        let coin = cache.access_coin(&OutPoint { txid: *txid, vout });
        (!coin.is_spent()).then_some(coin)
    })
}
