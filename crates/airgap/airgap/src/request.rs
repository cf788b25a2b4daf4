//! ERC-4527 `eth-sign-request` decoding.
//!
//! The request is a CBOR map keyed by small integers:
//!
//! | key | value |
//! |-----|-------|
//! | 1 | request id, `#6.37(bytes .size 16)` |
//! | 2 | sign data (bytes) |
//! | 3 | data type (uint) |
//! | 4 | chain id (uint) |
//! | 5 | derivation path, `#6.304({1: [index, hardened, ...]})` |
//! | 6 | address (bytes) |
//! | 7 | origin (text) |
//!
//! Unknown keys are skipped. A missing or malformed derivation path never fails
//! the decode; it degrades to [`KeyPath::Unknown`].

use std::fmt;
use std::str::FromStr;

use alloy_primitives::hex;
use coins_bip32::path::DerivationPath;
use minicbor::{Decode, Decoder, data::Type, decode::Error as DecodeError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, ParseError};

/// CBOR tag of a UUID
pub const UUID_TAG: u64 = 37;
/// CBOR tag of a `crypto-keypath`
pub const KEYPATH_TAG: u64 = 304;
/// UR type of a signing request
pub const ETH_SIGN_REQUEST_UR_TYPE: &str = "eth-sign-request";

const HARDENED_BIT: u32 = 0x8000_0000;

/// What `sign_data` holds, which fixes both the hash and the `v` encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// RLP-encoded legacy (EIP-155) transaction
    #[default]
    LegacyTx = 1,
    /// EIP-712 typed data as JSON
    TypedData = 2,
    /// EIP-191 personal message
    PersonalMessage = 3,
    /// EIP-2718 typed transaction (EIP-1559 and later)
    Eip1559Tx = 4,
}

impl DataType {
    /// Unknown codes fall back to [`DataType::LegacyTx`]
    pub const fn from_code(code: u64) -> Self {
        match code {
            2 => Self::TypedData,
            3 => Self::PersonalMessage,
            4 => Self::Eip1559Tx,
            _ => Self::LegacyTx,
        }
    }

    /// Registry code of the data type
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// One level of a BIP-32 path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathComponent {
    /// Child index without the hardened bit
    pub index: u32,
    /// Whether the component is hardened
    pub hardened: bool,
}

impl PathComponent {
    /// Index as sent to the card, hardened bit included
    pub const fn child_number(self) -> u32 {
        if self.hardened {
            self.index | HARDENED_BIT
        } else {
            self.index
        }
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)?;
        if self.hardened {
            write!(f, "'")?;
        }
        Ok(())
    }
}

/// Derivation path of a request, or the `unknown` sentinel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyPath {
    /// Components from the master key down
    Known(Vec<PathComponent>),
    /// Missing or not understood
    #[default]
    Unknown,
}

impl KeyPath {
    /// Rendering of [`KeyPath::Unknown`]
    pub const UNKNOWN: &'static str = "unknown";

    /// Parse a `crypto-keypath` item. Any structural deviation yields [`KeyPath::Unknown`].
    pub fn from_cbor(raw: &[u8]) -> Self {
        match parse_keypath(&mut Decoder::new(raw)) {
            Ok(components) if !components.is_empty() => Self::Known(components),
            Ok(_) => Self::Unknown,
            Err(e) => {
                debug!(error = %e, "Derivation path not understood");
                Self::Unknown
            }
        }
    }

    /// Components, empty when unknown
    pub fn components(&self) -> &[PathComponent] {
        match self {
            Self::Known(components) => components,
            Self::Unknown => &[],
        }
    }

    /// Whether the path can be signed with
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Path in the form the card signs with
    pub fn to_derivation_path(&self) -> Result<DerivationPath, Error> {
        match self {
            Self::Known(_) => DerivationPath::from_str(&self.to_string())
                .map_err(|_| Error::UnknownDerivationPath),
            Self::Unknown => Err(Error::UnknownDerivationPath),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(components) => {
                write!(f, "m")?;
                for component in components {
                    write!(f, "/{component}")?;
                }
                Ok(())
            }
            Self::Unknown => f.write_str(Self::UNKNOWN),
        }
    }
}

/// Advance through a definite or indefinite container, returning whether an item follows.
///
/// The break ending an indefinite container is consumed.
fn next_item(d: &mut Decoder<'_>, remaining: &mut Option<u64>) -> Result<bool, DecodeError> {
    match remaining {
        Some(0) => Ok(false),
        Some(n) => {
            *n -= 1;
            Ok(true)
        }
        None if d.datatype()? == Type::Break => {
            d.set_position(d.position() + 1);
            Ok(false)
        }
        None => Ok(true),
    }
}

/// Read an unsigned map key. Other keys are skipped along with their value.
fn next_key(d: &mut Decoder<'_>) -> Result<Option<u64>, DecodeError> {
    match d.datatype()? {
        Type::U8 | Type::U16 | Type::U32 | Type::U64 => Ok(Some(d.u64()?)),
        other => {
            debug!(%other, "Skipping entry with non-integer key");
            d.skip()?;
            d.skip()?;
            Ok(None)
        }
    }
}

fn parse_keypath(d: &mut Decoder<'_>) -> Result<Vec<PathComponent>, DecodeError> {
    if d.datatype()? == Type::Tag && d.tag()?.as_u64() != KEYPATH_TAG {
        return Err(DecodeError::message("unexpected derivation path tag"));
    }

    let mut entries = d.map()?;
    let mut components = None;
    while next_item(d, &mut entries)? {
        match next_key(d)? {
            Some(1) => components = Some(parse_components(d)?),
            Some(_) => d.skip()?,
            None => {}
        }
    }

    components.ok_or_else(|| DecodeError::message("derivation path has no components"))
}

fn parse_components(d: &mut Decoder<'_>) -> Result<Vec<PathComponent>, DecodeError> {
    let mut items = d.array()?;
    let mut components = Vec::new();

    while next_item(d, &mut items)? {
        let index = d.u32()?;
        if index & HARDENED_BIT != 0 {
            return Err(DecodeError::message("path index out of range"));
        }
        if !next_item(d, &mut items)? {
            return Err(DecodeError::message("path index without hardened flag"));
        }
        let hardened = match d.datatype()? {
            Type::Bool => d.bool()?,
            Type::U8 | Type::U16 | Type::U32 | Type::U64 => d.u64()? != 0,
            _ => return Err(DecodeError::message("hardened flag is not a boolean")),
        };
        components.push(PathComponent { index, hardened });
    }

    Ok(components)
}

/// Decoded `eth-sign-request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Correlation id echoed in the response, when present
    pub request_id: Option<Uuid>,
    /// Payload to hash and sign
    pub sign_data: Vec<u8>,
    /// How `sign_data` is hashed
    pub data_type: DataType,
    /// Chain id, used for legacy transaction `v`
    pub chain_id: Option<u64>,
    /// Key to sign with
    pub derivation_path: KeyPath,
    /// Display only, `0x` prefixed
    pub address: Option<String>,
    /// Display only
    pub origin: Option<String>,
}

impl SignRequest {
    /// Decode the CBOR payload of an `eth-sign-request`
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(minicbor::decode(bytes)?)
    }

    /// Lowercase hex rendering of the sign data, for display
    pub fn sign_data_hex(&self) -> String {
        hex::encode(&self.sign_data)
    }
}

/// Decode an ERC-4527 signing request
pub fn decode(bytes: &[u8]) -> Result<SignRequest, ParseError> {
    SignRequest::decode(bytes)
}

impl<'b, C> Decode<'b, C> for SignRequest {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, DecodeError> {
        let mut request_id = None;
        let mut sign_data = None;
        let mut data_type = DataType::default();
        let mut chain_id = None;
        let mut derivation_path = KeyPath::Unknown;
        let mut address = None;
        let mut origin = None;

        let mut entries = d.map()?;
        while next_item(d, &mut entries)? {
            let Some(key) = next_key(d)? else {
                continue;
            };
            match key {
                1 => {
                    if d.datatype()? == Type::Tag {
                        d.tag()?;
                    }
                    let raw = d.bytes()?;
                    request_id = Uuid::from_slice(raw).ok();
                    if request_id.is_none() {
                        warn!(len = raw.len(), "Ignoring request id that is not a UUID");
                    }
                }
                2 => sign_data = Some(d.bytes()?.to_vec()),
                3 => data_type = DataType::from_code(d.u64()?),
                4 => chain_id = Some(d.u64()?),
                5 => {
                    let start = d.position();
                    d.skip()?;
                    derivation_path = KeyPath::from_cbor(&d.input()[start..d.position()]);
                }
                6 => address = Some(hex::encode_prefixed(d.bytes()?)),
                7 => origin = Some(d.str()?.to_owned()),
                key => {
                    debug!(key, "Skipping unknown sign request key");
                    d.skip()?;
                }
            }
        }

        let sign_data = sign_data.ok_or_else(|| DecodeError::message("missing sign data"))?;

        Ok(Self {
            request_id,
            sign_data,
            data_type,
            chain_id,
            derivation_path,
            address,
            origin,
        })
    }
}

impl fmt::Display for SignRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sign request:")?;
        match &self.request_id {
            Some(id) => writeln!(f, "  Request ID: {id}")?,
            None => writeln!(f, "  Request ID: None")?,
        }
        writeln!(f, "  Data type: {:?}", self.data_type)?;
        match self.chain_id {
            Some(chain_id) => writeln!(f, "  Chain ID: {chain_id}")?,
            None => writeln!(f, "  Chain ID: None")?,
        }
        writeln!(f, "  Derivation path: {}", self.derivation_path)?;
        if let Some(address) = &self.address {
            writeln!(f, "  Address: {address}")?;
        }
        if let Some(origin) = &self.origin {
            writeln!(f, "  Origin: {origin}")?;
        }
        write!(f, "  Sign data: {}", self.sign_data_hex())
    }
}
