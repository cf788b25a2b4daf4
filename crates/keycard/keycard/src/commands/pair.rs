use crate::apdu::{Command, Response, status};
use crate::constants::{CLA_GP, ins};
use crate::crypto::{Challenge, Cryptogram};
use crate::{Error, Result};

/// PAIR command for Keycard
#[derive(Debug, Clone, Copy)]
pub struct PairCommand;

/// Successful PAIR responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOk {
    /// First stage: card cryptogram over our challenge and the card's own challenge
    FirstStageSuccess {
        /// Card proof of the pairing token
        cryptogram: Cryptogram,
        /// Challenge the client must answer
        challenge: Challenge,
    },
    /// Final stage: allocated pairing slot and the salt for the pairing key
    FinalStageSuccess {
        /// Slot the pairing occupies
        pairing_index: u8,
        /// Salt hashed with the pairing token into the pairing key
        salt: Challenge,
    },
}

impl PairCommand {
    /// Create a PAIR for first stage with the client challenge
    pub fn with_first_stage(challenge: &Challenge) -> Command {
        Command::new(CLA_GP, ins::PAIR, 0x00, 0x00)
            .with_data(challenge.to_vec())
            .with_le(0)
    }

    /// Create a PAIR for final stage with the client cryptogram
    pub fn with_final_stage(cryptogram: &Cryptogram) -> Command {
        Command::new(CLA_GP, ins::PAIR, 0x01, 0x00)
            .with_data(cryptogram.to_vec())
            .with_le(0)
    }

    /// Parse either PAIR stage
    pub fn parse_response(response: Response) -> Result<PairOk> {
        match response.status() {
            status::SW_NO_ERROR => {
                let payload = response.payload();
                match payload.len() {
                    64 => Ok(PairOk::FirstStageSuccess {
                        cryptogram: *Cryptogram::from_slice(&payload[..32]),
                        challenge: *Challenge::from_slice(&payload[32..]),
                    }),
                    33 => Ok(PairOk::FinalStageSuccess {
                        pairing_index: payload[0],
                        salt: *Challenge::from_slice(&payload[1..]),
                    }),
                    _ => Err(Error::InvalidData("Invalid PAIR payload length")),
                }
            }
            status::SW_FILE_FULL => Err(Error::NoAvailablePairingSlots),
            status::SW_SECURITY_STATUS_NOT_SATISFIED => {
                Err(Error::PairingFailed("card rejected the client cryptogram"))
            }
            sw => Err(Error::Status {
                command: "PAIR",
                sw,
            }),
        }
    }
}
