use bytes::Bytes;

use crate::apdu::{Command, Response};
use crate::constants::{CLA_ISO7816, ins};
use crate::types::ApplicationInfo;
use crate::Result;

/// SELECT command for Keycard
#[derive(Debug, Clone, Copy)]
pub struct SelectCommand;

impl SelectCommand {
    /// Select an applet by AID
    pub fn with_aid(aid: &[u8]) -> Command {
        Command::new(CLA_ISO7816, ins::SELECT, 0x04, 0x00)
            .with_data(Bytes::copy_from_slice(aid))
            .with_le(0)
    }

    /// Any status other than `9000` is fatal: the applet is missing or refused selection
    pub fn parse_response(response: Response) -> Result<ApplicationInfo> {
        let payload = response.success_payload("SELECT")?;
        ApplicationInfo::try_from(payload.as_ref())
    }
}
