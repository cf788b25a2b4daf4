use k256::{PublicKey, elliptic_curve::sec1::ToEncodedPoint};

use crate::apdu::{Command, Response, status};
use crate::constants::{CLA_GP, ins};
use crate::{Error, Result};

/// OPEN SECURE CHANNEL command for Keycard
#[derive(Debug, Clone, Copy)]
pub struct OpenSecureChannelCommand;

impl OpenSecureChannelCommand {
    /// Open the channel on `pairing_index` with the host's ephemeral public key
    pub fn with_pairing_index_and_pubkey(pairing_index: u8, public_key: &PublicKey) -> Command {
        Command::new(CLA_GP, ins::OPEN_SECURE_CHANNEL, pairing_index, 0x00)
            .with_data(public_key.to_encoded_point(false).as_bytes().to_vec())
            .with_le(0)
    }

    /// Returns the raw `salt | iv` payload
    pub fn parse_response(response: Response, pairing_index: u8) -> Result<bytes::Bytes> {
        match response.status() {
            status::SW_NO_ERROR => Ok(response.into_payload()),
            status::SW_INCORRECT_P1P2 => Err(Error::InvalidPairingIndex(pairing_index)),
            sw => Err(Error::Status {
                command: "OPEN SECURE CHANNEL",
                sw,
            }),
        }
    }
}
