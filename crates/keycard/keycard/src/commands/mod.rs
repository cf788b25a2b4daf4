//! Command builders and response parsers for the subset of the Keycard
//! applet used during an air-gapped signing session.

use bytes::{Bytes, BytesMut};
use coins_bip32::path::DerivationPath;

/// MUTUALLY AUTHENTICATE
pub mod mutually_authenticate;
pub use mutually_authenticate::*;
/// OPEN SECURE CHANNEL
pub mod open_secure_channel;
pub use open_secure_channel::*;
/// PAIR
pub mod pair;
pub use pair::*;
/// SELECT
pub mod select;
pub use select::*;
/// SIGN
pub mod sign;
pub use sign::*;
/// VERIFY PIN
pub mod verify_pin;
pub use verify_pin::*;

pub(crate) fn derivation_path_to_bytes(path: &DerivationPath) -> Bytes {
    path.iter()
        .fold(BytesMut::new(), |mut bytes, component| {
            bytes.extend_from_slice(&component.to_be_bytes());
            bytes
        })
        .freeze()
}
