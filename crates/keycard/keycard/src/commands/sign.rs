use bytes::{Bytes, BytesMut};
use coins_bip32::path::DerivationPath;

use super::derivation_path_to_bytes;
use crate::apdu::{Command, Response, status};
use crate::constants::{CLA_GP, DERIVE_FROM_MASTER, SIGN_CURRENT_KEY, ins};
use crate::{Error, Result};

/// SIGN command for Keycard
#[derive(Debug, Clone, Copy)]
pub struct SignCommand;

impl SignCommand {
    /// Sign a 32-byte hash with the key derived along `path` from the master key.
    ///
    /// An empty path signs with the currently loaded key.
    pub fn with(hash: &[u8; 32], path: &DerivationPath) -> Command {
        let path_data = derivation_path_to_bytes(path);
        let p1 = if path_data.is_empty() {
            SIGN_CURRENT_KEY
        } else {
            DERIVE_FROM_MASTER
        };

        let mut buf = BytesMut::with_capacity(hash.len() + path_data.len());
        buf.extend_from_slice(hash);
        buf.extend_from_slice(&path_data);

        Command::new(CLA_GP, ins::SIGN, p1, 0x00)
            .with_data(buf.freeze())
            .with_le(0)
    }

    /// Returns the raw signature template TLV
    pub fn parse_response(response: Response) -> Result<Bytes> {
        match response.status() {
            status::SW_NO_ERROR if response.payload().is_empty() => {
                Err(Error::InvalidData("Empty signature"))
            }
            status::SW_NO_ERROR => Ok(response.into_payload()),
            status::SW_CONDITIONS_NOT_SATISFIED => Err(Error::SignConditionsNotSatisfied),
            sw => Err(Error::Status {
                command: "SIGN",
                sw,
            }),
        }
    }
}
