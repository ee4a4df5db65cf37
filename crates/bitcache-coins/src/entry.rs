//! Cache entries and their propagation flags.

use crate::coin::Coin;

/// The entry differs from the parent view (or the parent's state is unknown)
/// and must be written back on flush.
pub(crate) const DIRTY: u8 = 1 << 0;

/// The parent view is known to hold no unspent coin for this outpoint: if the
/// entry ends up spent it can simply be dropped instead of propagating a
/// deletion record. Never set without [`DIRTY`].
pub(crate) const FRESH: u8 = 1 << 1;

/// A cached coin plus the flags describing how it relates to the parent view.
///
/// An entry with no flags is a pure read-through copy and can always be
/// dropped safely.
#[derive(Debug, Clone, Default)]
pub(crate) struct CacheEntry {
    pub(crate) coin: Coin,
    pub(crate) flags: u8,
}

impl CacheEntry {
    /// A flagless read-through copy of `coin`.
    pub(crate) fn clean(coin: Coin) -> Self {
        Self { coin, flags: 0 }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.flags & DIRTY != 0
    }

    pub(crate) fn is_fresh(&self) -> bool {
        self.flags & FRESH != 0
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.flags == 0
    }
}
