use bytes::Bytes;

use crate::apdu::{Command, Response, status};
use crate::constants::{CLA_GP, ins};
use crate::{Error, Result};

/// VERIFY PIN command for Keycard
#[derive(Debug, Clone, Copy)]
pub struct VerifyPinCommand;

impl VerifyPinCommand {
    /// Create a VERIFY PIN command with PIN
    pub fn with_pin(pin: &str) -> Command {
        Command::new(CLA_GP, ins::VERIFY_PIN, 0x00, 0x00).with_data(Bytes::copy_from_slice(pin.as_bytes()))
    }

    /// Map `63Cx` to the remaining attempts
    pub fn parse_response(response: Response) -> Result<()> {
        match response.status() {
            status::SW_NO_ERROR => Ok(()),
            status::SW_PIN_BLOCKED => Err(Error::PinBlocked),
            sw if sw.sw1 == 0x63 => Err(Error::WrongPin {
                remaining: sw.sw2 & 0x0F,
            }),
            sw => Err(Error::Status {
                command: "VERIFY PIN",
                sw,
            }),
        }
    }
}
