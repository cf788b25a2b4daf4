use std::fmt;

use cipher::Key;
use zeroize::Zeroize;

use crate::crypto::KeycardScp;

/// Pairing slot and shared key established by PAIR
#[derive(Clone, PartialEq, Eq)]
pub struct PairingInfo {
    /// Shared pairing key
    pub key: Key<KeycardScp>,
    /// Pairing slot on the card
    pub index: u8,
}

impl PairingInfo {
    /// Pairing from a raw key and slot
    pub fn new(key: [u8; 32], index: u8) -> Self {
        Self {
            key: key.into(),
            index,
        }
    }
}

impl fmt::Debug for PairingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingInfo")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Drop for PairingInfo {
    fn drop(&mut self) {
        self.key.as_mut_slice().zeroize();
    }
}
