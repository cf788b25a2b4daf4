use crate::session::Phase;
use crate::tlv::TlvError;

/// Result type for air-gapped signing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to decode a scanned payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The payload is not valid CBOR for the expected schema
    #[error("invalid CBOR payload: {0}")]
    Cbor(String),

    /// The scanned UR carries a different registry type
    #[error("unexpected UR type {found}, expected {expected}")]
    UrType {
        /// Type found in the scanned UR
        found: String,
        /// Type the caller asked for
        expected: &'static str,
    },
}

impl From<minicbor::decode::Error> for ParseError {
    fn from(error: minicbor::decode::Error) -> Self {
        Self::Cbor(error.to_string())
    }
}

/// Error type for air-gapped signing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A scanned payload could not be decoded
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The card's signature template is malformed
    #[error("malformed signature TLV: {0}")]
    Tlv(#[from] TlvError),

    /// Card errors, including non-success status words
    #[error(transparent)]
    Keycard(#[from] nexum_keycard::Error),

    /// The template's public key is not an uncompressed point
    #[error("invalid public key in signature response")]
    InvalidPublicKey,

    /// `r` or `s` is not a valid scalar
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] k256::ecdsa::Error),

    /// Neither recovery candidate yields the card's public key.
    ///
    /// The card signed a different hash than the one computed here.
    #[error("cannot determine recovery id")]
    RecoveryIdNotFound,

    /// The request carries no usable derivation path
    #[error("derivation path is unknown, refusing to sign")]
    UnknownDerivationPath,

    /// Typed data JSON could not be hashed
    #[error("invalid EIP-712 typed data: {0}")]
    TypedData(String),

    /// CBOR encoding of the response failed
    #[error("failed to encode signature: {0}")]
    Encode(String),

    /// The call does not fit the current phase
    #[error("operation not allowed while session is {0}")]
    InvalidPhase(Phase),

    /// Pairing store failure
    #[error("pairing store error: {0}")]
    Store(String),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Pairing file is not valid JSON
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
