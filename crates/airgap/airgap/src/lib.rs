//! Air-gapped Ethereum signing with a Keycard.
//!
//! A watch-only wallet shows an `eth-sign-request` as animated QR codes. The
//! frames are reassembled with [`UrScanner`], decoded into a [`SignRequest`],
//! hashed per data type and signed by the card inside a [`CardSession`]. The
//! card's signature template is turned into an `eth-signature` and shown back
//! as a single UR.

mod error;
pub use error::{Error, ParseError, Result};

/// Signing hashes per data type
pub mod hash;
pub use hash::signing_hash;

mod operation;
pub use operation::signing_operation;

/// Request decoding
pub mod request;
pub use request::{DataType, KeyPath, PathComponent, SignRequest};

/// Card session state machine
pub mod session;
pub use session::{
    CardSession, EventBus, ExecuteOptions, FilePairingStore, MemoryPairingStore, NfcController,
    NfcEvent, PairingStore, Phase, SessionConfig, Subscription,
};

/// Signature assembly
pub mod signature;
pub use signature::{EthSignature, SignatureComponents, assemble};

/// BER-TLV reading
pub mod tlv;
pub use tlv::{TlvError, TlvReader};

/// UR frame scanning
pub mod scanner;
pub use scanner::{ScanOutcome, UrScanner, encode_single};

pub use nexum_keycard as keycard;
