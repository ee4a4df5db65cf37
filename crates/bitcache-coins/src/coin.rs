//! The coin record and its outpoint storage keys.

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::{OutPoint, TxOut};

const MAX_SCRIPT_SIZE: usize = 10_000;

/// A single transaction output together with the metadata needed to validate
/// spends of it.
///
/// The canonical *spent* form has an empty script and height zero; it is what
/// [`Coin::clear`] leaves behind and what lookups of unknown outpoints yield.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Coin {
    /// Whether the coin is from a coinbase transaction.
    pub is_coinbase: bool,
    /// Transfer value in satoshis.
    pub amount: u64,
    /// Block height at which the containing transaction was included.
    pub height: u32,
    /// Spending condition of the output.
    pub script_pubkey: Vec<u8>,
}

impl Coin {
    /// Create a coin from its parts.
    pub fn new(is_coinbase: bool, amount: u64, height: u32, script_pubkey: Vec<u8>) -> Self {
        Self {
            is_coinbase,
            amount,
            height,
            script_pubkey,
        }
    }

    /// Create a coin from a transaction output.
    pub fn from_txout(output: &TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            is_coinbase,
            amount: output.value.to_sat(),
            height,
            script_pubkey: output.script_pubkey.to_bytes(),
        }
    }

    /// Convert back into a transaction output.
    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: bitcoin::Amount::from_sat(self.amount),
            script_pubkey: bitcoin::ScriptBuf::from_bytes(self.script_pubkey.clone()),
        }
    }

    /// Whether this record is the canonical spent form.
    pub fn is_spent(&self) -> bool {
        self.script_pubkey.is_empty() && self.height == 0
    }

    /// Reset to the canonical spent form, returning the previous record.
    pub fn clear(&mut self) -> Coin {
        std::mem::take(self)
    }

    /// Whether the output can never be spent (data carrier or oversized
    /// script). Such outputs are not worth tracking in the coin set.
    pub fn is_unspendable(&self) -> bool {
        self.script_pubkey.first() == Some(&OP_RETURN.to_u8())
            || self.script_pubkey.len() > MAX_SCRIPT_SIZE
    }
}

/// Convert an outpoint to its 36-byte storage key: txid (32 bytes, raw)
/// followed by the output index (4 bytes, little-endian).
pub fn outpoint_to_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(outpoint.txid.as_ref());
    key[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
    key
}

/// Parse a 36-byte storage key back into an outpoint.
pub fn key_to_outpoint(key: &[u8; 36]) -> OutPoint {
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&key[..32]);
    let vout = u32::from_le_bytes(key[32..].try_into().expect("key slice is 4 bytes"));
    OutPoint {
        txid: bitcoin::Txid::from_byte_array(txid),
        vout,
    }
}
