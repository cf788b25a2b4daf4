use std::fmt;

use alloy_primitives::hex::{self, ToHexExt};
use derive_more::{Display, From, Into};
use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::{Error, tags};

use super::get_primitive_value;

/// Application version (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, From, Into)]
#[display("{}.{}", major, minor)]
pub struct Version {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

/// Application info returned by SELECT
#[derive(Debug, Clone)]
pub struct ApplicationInfo {
    /// Instance UID (16 bytes)
    pub instance_uid: [u8; 16],
    /// Secure channel public key
    pub public_key: Option<k256::PublicKey>,
    /// Application version
    pub version: Version,
    /// Number of remaining pairing slots
    pub remaining_slots: u8,
    /// Key UID (SHA-256 of the master public key), absent until a key is loaded
    pub key_uid: Option<[u8; 32]>,
}

impl ApplicationInfo {
    /// Hex encoded instance UID, the identifier pairings are stored under
    pub fn instance_uid_hex(&self) -> String {
        hex::encode(self.instance_uid)
    }
}

impl TryFrom<&[u8]> for ApplicationInfo {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let tlv = Tlv::from_bytes(value)?;

        if tlv.tag() == &Tag::try_from(tags::ECC_PUBLIC_KEY)? {
            // A pre-initialised card only answers with its public key
            return Err(Error::NotInitialised);
        }

        Self::try_from(&tlv)
    }
}

impl TryFrom<&Tlv> for ApplicationInfo {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        if tlv.tag() != &Tag::try_from(tags::TEMPLATE_APPLICATION_INFO)? {
            return Err(Error::InvalidData(
                "TLV tag was not application info template tag",
            ));
        }

        let Value::Constructed(tlvs) = tlv.value() else {
            return Err(Error::InvalidData("TLV value was not constructed"));
        };

        let uid_tag = Tag::try_from(tags::INSTANCE_UID)?;
        let key_tag = Tag::try_from(tags::ECC_PUBLIC_KEY)?;
        let other_tag = Tag::try_from(tags::OTHER)?;
        let key_uid_tag = Tag::try_from(tags::KEY_UID)?;

        let find = |tag: &Tag| tlvs.iter().find(|t| t.tag() == tag);

        let instance_uid: [u8; 16] = get_primitive_value(
            &uid_tag,
            find(&uid_tag).ok_or(Error::InvalidData("Missing instance UID"))?,
        )?
        .try_into()
        .map_err(|_| Error::InvalidData("Invalid instance UID length"))?;

        let public_key = match find(&key_tag) {
            Some(t) => {
                let raw = get_primitive_value(&key_tag, t)?;
                match raw.len() {
                    0 => None,
                    65 => Some(k256::PublicKey::from_sec1_bytes(&raw)?),
                    _ => return Err(Error::InvalidData("Invalid public key length")),
                }
            }
            None => None,
        };

        // Version and remaining slots share the OTHER tag, in that order
        let mut others = tlvs.iter().filter(|t| t.tag() == &other_tag);
        let version = match others.next() {
            Some(t) => match get_primitive_value(&other_tag, t)?.as_slice() {
                [major, minor] => Version {
                    major: *major,
                    minor: *minor,
                },
                _ => return Err(Error::InvalidData("Invalid version length")),
            },
            None => return Err(Error::InvalidData("Missing application version")),
        };
        let remaining_slots = match others.next() {
            Some(t) => *get_primitive_value(&other_tag, t)?
                .first()
                .ok_or(Error::InvalidData("Empty pairing slot count"))?,
            None => 0,
        };

        let key_uid = match find(&key_uid_tag) {
            Some(t) => {
                let raw = get_primitive_value(&key_uid_tag, t)?;
                match raw.len() {
                    0 => None,
                    32 => raw.try_into().ok(),
                    _ => return Err(Error::InvalidData("Invalid key UID length")),
                }
            }
            None => None,
        };

        Ok(Self {
            instance_uid,
            public_key,
            version,
            remaining_slots,
            key_uid,
        })
    }
}

impl fmt::Display for ApplicationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Application Info:")?;
        writeln!(f, "  Instance UID: {}", hex::encode(self.instance_uid))?;
        writeln!(f, "  Version: {}", self.version)?;
        writeln!(f, "  Remaining pairing slots: {}", self.remaining_slots)?;
        match &self.key_uid {
            Some(key_uid) => writeln!(f, "  Key UID: {}", key_uid.encode_hex_with_prefix())?,
            None => writeln!(f, "  Key UID: None")?,
        }
        write!(f, "  Secure channel public key: ")?;
        match &self.public_key {
            Some(public_key) => write!(
                f,
                "{}",
                public_key.to_sec1_bytes().encode_hex_with_prefix()
            ),
            None => write!(f, "None"),
        }
    }
}
