//! Minimal ISO/IEC 7816-4 framing for the Keycard command set.
//!
//! Commands are short APDUs (Lc and Le fit in one byte); responses are the
//! payload followed by the two status bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result, TransportError};

/// Status words returned by the Keycard applet
pub mod status {
    use super::StatusWord;

    /// Success
    pub const SW_NO_ERROR: StatusWord = StatusWord::new(0x90, 0x00);
    /// Security status not satisfied
    pub const SW_SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
    /// Conditions of use not satisfied
    pub const SW_CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);
    /// Wrong data
    pub const SW_WRONG_DATA: StatusWord = StatusWord::new(0x6A, 0x80);
    /// Applet or file not found
    pub const SW_FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
    /// No space left, e.g. no free pairing slot
    pub const SW_FILE_FULL: StatusWord = StatusWord::new(0x6A, 0x84);
    /// Incorrect P1 or P2
    pub const SW_INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);
    /// Referenced data not found
    pub const SW_REFERENCED_DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);
    /// PIN blocked, no attempts remaining
    pub const SW_PIN_BLOCKED: StatusWord = StatusWord::new(0x63, 0xC0);
}

/// Two-byte status word trailing every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte
    pub sw1: u8,
    /// Second status byte
    pub sw2: u8,
}

impl StatusWord {
    /// Status word from its two bytes
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Both bytes as one big-endian value
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }

    /// Whether this is `9000`
    pub const fn is_success(self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        Self::new((value >> 8) as u8, value as u8)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Byte-oriented command/response channel to a card in the field.
///
/// Implemented by the platform (PC/SC reader, mobile NFC stack, test fakes).
pub trait CardTransport {
    /// Send one raw APDU and return the raw response including the status word
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError>;
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }
}

/// Short APDU command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// First parameter
    pub p1: u8,
    /// Second parameter
    pub p2: u8,
    /// Command data, sent with its length as Lc
    pub data: Option<Bytes>,
    /// Expected response length
    pub le: Option<u8>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Attach command data (Lc is derived from its length)
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected response length
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Command payload, empty when absent
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Serialize to raw APDU bytes.
    ///
    /// Fails when the data does not fit a short APDU.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let data_len = self.data.as_ref().map_or(0, |d| d.len() + 1);
        let mut buffer = BytesMut::with_capacity(4 + data_len + 1);

        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if let Some(data) = &self.data {
            let lc = u8::try_from(data.len())
                .map_err(|_| Error::InvalidData("Command data too long for a short APDU"))?;
            buffer.put_u8(lc);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        Ok(buffer.freeze())
    }
}

/// Response APDU split into payload and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
    status: StatusWord,
}

impl Response {
    /// Split raw response bytes into payload and status word
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::InvalidResponseLength(data.len()));
        }
        let (payload, sw) = data.split_at(data.len() - 2);
        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status: StatusWord::new(sw[0], sw[1]),
        })
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Whether the status is `9000`
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Response data without the status word
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Return the payload on `9000`, otherwise a status error naming `command`
    pub fn success_payload(self, command: &'static str) -> Result<Bytes> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(Error::Status {
                command,
                sw: self.status,
            })
        }
    }
}
