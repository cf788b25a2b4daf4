//! Forward-only BER-TLV cursor for card responses.

use std::collections::VecDeque;

use iso7816_tlv::ber::{Tag, Tlv, Value};

/// Errors raised while walking a TLV buffer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TlvError {
    /// The buffer is not well-formed BER-TLV
    #[error("malformed BER-TLV: {0}")]
    Malformed(iso7816_tlv::TlvError),

    /// The next node carries another tag
    #[error("expected tag {expected:#04x}, found {found}")]
    UnexpectedTag {
        /// Tag the caller asked for
        expected: u8,
        /// Tag of the node under the cursor
        found: Tag,
    },

    /// A primitive was expected where a constructed node sits, or the reverse
    #[error("tag {0:#04x} has the wrong encoding")]
    UnexpectedEncoding(u8),

    /// No nodes remain
    #[error("buffer ended before tag {0:#04x}")]
    UnexpectedEnd(u8),

    /// A DER integer has more than 32 significant bytes
    #[error("integer of {0} bytes does not fit in 32 bytes")]
    IntegerTooLong(usize),
}

impl From<iso7816_tlv::TlvError> for TlvError {
    fn from(error: iso7816_tlv::TlvError) -> Self {
        Self::Malformed(error)
    }
}

/// Depth-first reader over a BER-TLV buffer.
///
/// Nodes are visited in document order: entering a constructed node puts
/// its children ahead of its following siblings.
#[derive(Debug, Clone)]
pub struct TlvReader {
    pending: VecDeque<Tlv>,
}

impl TlvReader {
    /// Parse every top-level node of `buf`
    pub fn new(buf: &[u8]) -> Result<Self, TlvError> {
        let mut pending = VecDeque::new();
        let mut rest = buf;
        while !rest.is_empty() {
            let (tlv, tail) = Tlv::parse(rest);
            pending.push_back(tlv?);
            rest = tail;
        }
        Ok(Self { pending })
    }

    /// Whether every node has been consumed
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Step into a constructed node, leaving the cursor on its first child.
    ///
    /// Returns the length of the node's value.
    pub fn enter_constructed(&mut self, tag: u8) -> Result<usize, TlvError> {
        let tlv = self.next(tag)?;
        let len = tlv.value().len_as_bytes();
        match tlv.value() {
            Value::Constructed(children) => {
                for child in children.iter().rev() {
                    self.pending.push_front(child.clone());
                }
                Ok(len)
            }
            Value::Primitive(_) => Err(TlvError::UnexpectedEncoding(tag)),
        }
    }

    /// Consume a primitive node and return its value
    pub fn read_primitive(&mut self, tag: u8) -> Result<Vec<u8>, TlvError> {
        match self.next(tag)?.value() {
            Value::Primitive(bytes) => Ok(bytes.clone()),
            Value::Constructed(_) => Err(TlvError::UnexpectedEncoding(tag)),
        }
    }

    fn next(&mut self, expected: u8) -> Result<Tlv, TlvError> {
        let tag = Tag::try_from(expected)?;
        let tlv = self
            .pending
            .pop_front()
            .ok_or(TlvError::UnexpectedEnd(expected))?;
        if tlv.tag() != &tag {
            return Err(TlvError::UnexpectedTag {
                expected,
                found: tlv.tag().clone(),
            });
        }
        Ok(tlv)
    }
}

/// Normalize a DER INTEGER value to a 32-byte big-endian field.
///
/// Strips the sign padding byte and left-pads short values.
pub fn normalize_integer(value: &[u8]) -> Result<[u8; 32], TlvError> {
    let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    let digits = &value[start..];
    if digits.len() > 32 {
        return Err(TlvError::IntegerTooLong(digits.len()));
    }

    let mut out = [0u8; 32];
    out[32 - digits.len()..].copy_from_slice(digits);
    Ok(out)
}
