use crate::apdu::{Command, Response, status};
use crate::constants::{CLA_GP, ins};
use crate::crypto::{Challenge, Cryptogram};
use crate::{Error, Result};

/// MUTUALLY AUTHENTICATE command for Keycard
#[derive(Debug, Clone, Copy)]
pub struct MutuallyAuthenticateCommand;

impl MutuallyAuthenticateCommand {
    /// Create a MUTUALLY AUTHENTICATE command with a random host challenge
    pub fn with_challenge(challenge: &Challenge) -> Command {
        Command::new(CLA_GP, ins::MUTUALLY_AUTHENTICATE, 0x00, 0x00)
            .with_data(challenge.to_vec())
            .with_le(0)
    }

    /// The cryptogram itself carries no information: a response that decrypts
    /// and verifies proves both sides derived the same session keys.
    pub fn parse_response(response: Response) -> Result<Cryptogram> {
        match response.status() {
            status::SW_NO_ERROR if response.payload().len() == 32 => {
                Ok(*Cryptogram::from_slice(response.payload()))
            }
            status::SW_NO_ERROR => Err(Error::InvalidData("Invalid cryptogram length")),
            _ => Err(Error::MutualAuthenticationFailed),
        }
    }
}
