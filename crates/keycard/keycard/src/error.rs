use iso7816_tlv::TlvError;

use crate::apdu::StatusWord;

/// Result type for Keycard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the byte-oriented card transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The card left the field or the reader dropped the connection
    #[error("Card connection lost")]
    ConnectionLost,

    /// Any other transport-specific failure
    #[error("Transport error: {0}")]
    Other(String),
}

/// Error type for Keycard operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-related errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A command completed with a non-success status word
    #[error("{command} failed: card returned status {sw}")]
    Status {
        /// Name of the command that failed
        command: &'static str,
        /// Status word returned by the card
        sw: StatusWord,
    },

    /// Fewer than two bytes came back
    #[error("Response too short to carry a status word ({0} bytes)")]
    InvalidResponseLength(usize),

    /// The applet has no PIN or pairing secret yet
    #[error("Card is not initialised")]
    NotInitialised,

    /// SELECT returned no secure channel key
    #[error("Card did not report a secure channel public key")]
    NoSecureChannelKey,

    /// A secured command was sent before the channel was opened
    #[error("Secure channel is not open")]
    SecureChannelNotOpen,

    /// Every pairing slot of the card is taken
    #[error("No available pairing slots")]
    NoAvailablePairingSlots,

    /// Pairing cryptograms did not match
    #[error("Pairing failed: {0}")]
    PairingFailed(&'static str),

    /// The pairing slot is empty or out of range
    #[error("Invalid pairing index {0}")]
    InvalidPairingIndex(u8),

    /// The card failed to prove the session keys
    #[error("Mutual authentication failed")]
    MutualAuthenticationFailed,

    /// A secured response carried a bad MAC
    #[error("Response MAC verification failed")]
    InvalidMac,

    /// VERIFY PIN was refused
    #[error("Wrong PIN, remaining attempts: {remaining}")]
    WrongPin {
        /// Attempts left before the PIN is blocked
        remaining: u8,
    },

    /// No PIN attempts remain
    #[error("PIN is blocked")]
    PinBlocked,

    /// SIGN was refused before PIN verification
    #[error("Signing conditions not satisfied: secure channel and verified PIN required")]
    SignConditionsNotSatisfied,

    /// Malformed command or response data
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),

    /// Bad padding in a decrypted response
    #[error("Unpad error")]
    Unpad(#[from] cipher::block_padding::UnpadError),

    /// Padding a command failed
    #[error("Pad error")]
    Pad(#[from] cipher::inout::PadError),

    /// Malformed BER-TLV from the card
    #[error("TlvError: {0}")]
    Tlv(TlvError),

    /// Invalid curve point or scalar
    #[error(transparent)]
    EllipticCurve(#[from] k256::elliptic_curve::Error),

    /// Invalid derivation path
    #[error(transparent)]
    Bip32(#[from] coins_bip32::Bip32Error),
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::Tlv(error)
    }
}

impl Error {
    /// Status word carried by this error, if the card produced one
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Status { sw, .. } => Some(*sw),
            _ => None,
        }
    }

    /// Whether the error was raised by the transport rather than by the card
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the card refused a stored pairing while opening the secure channel.
    ///
    /// The slot was freed or the card was reset; pairing again is the only way forward.
    pub const fn is_pairing_rejected(&self) -> bool {
        matches!(
            self,
            Self::InvalidPairingIndex(_) | Self::MutualAuthenticationFailed
        )
    }
}
