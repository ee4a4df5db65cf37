//! XOR obfuscation of stored values.
//!
//! Coin records are XORed with a per-database random key before hitting disk,
//! so database files never contain byte-for-byte copies of script data. The
//! key is generated once when the database is created and persisted in the
//! metadata column; an all-zero key disables obfuscation.

use rand::Rng;

pub(crate) const OBFUSCATION_KEY_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Obfuscation {
    key: [u8; OBFUSCATION_KEY_BYTES],
}

impl Obfuscation {
    pub(crate) fn new(key: [u8; OBFUSCATION_KEY_BYTES]) -> Self {
        Self { key }
    }

    pub(crate) fn random() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    pub(crate) fn is_null(&self) -> bool {
        self.key == [0u8; OBFUSCATION_KEY_BYTES]
    }

    pub(crate) fn key_bytes(&self) -> &[u8; OBFUSCATION_KEY_BYTES] {
        &self.key
    }

    /// XOR `data` in place with the rolling key. Applying it twice restores
    /// the original bytes.
    pub(crate) fn apply(&self, data: &mut [u8]) {
        if self.is_null() {
            return;
        }
        for (byte, key) in data.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= key;
        }
    }
}
