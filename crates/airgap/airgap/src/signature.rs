//! Signature assembly: from the card's raw signature template to an ERC-4527
//! `eth-signature` ready to be shown as a QR code.

use alloy_primitives::B256;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use minicbor::{Decode, Decoder, Encode, Encoder, data::Tag, decode, encode};
use nexum_keycard::tags;
use tracing::debug;
use uuid::Uuid;

use crate::request::{DataType, UUID_TAG};
use crate::tlv::{TlvReader, normalize_integer};
use crate::scanner::encode_single;
use crate::{Error, ParseError, Result};

/// Origin reported in every response
pub const ORIGIN: &str = "nexum-airgap";
/// UR type of a signature response
pub const ETH_SIGNATURE_UR_TYPE: &str = "eth-signature";

/// Raw signature fields recovered from a card response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureComponents {
    /// Big-endian `r`
    pub r: [u8; 32],
    /// Low-s form
    pub s: [u8; 32],
    /// Recovery id, 0 or 1
    pub recovery_id: u8,
    /// SEC1 compressed key of the signer
    pub compressed_public_key: [u8; 33],
}

/// ERC-4527 `eth-signature`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthSignature {
    /// Id of the request this answers
    pub request_id: Option<Uuid>,
    /// `r | s | v`, with `v` in minimal big-endian form
    pub signature: Vec<u8>,
    /// Name of the signer
    pub origin: String,
}

impl EthSignature {
    /// `r` bytes
    pub fn r(&self) -> &[u8] {
        &self.signature[..32.min(self.signature.len())]
    }

    /// `s` bytes
    pub fn s(&self) -> &[u8] {
        self.signature.get(32..64).unwrap_or_default()
    }

    /// `v` bytes
    pub fn v(&self) -> &[u8] {
        self.signature.get(64..).unwrap_or_default()
    }

    /// CBOR encoding of the response map
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Decode a CBOR `eth-signature`
    pub fn from_cbor(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        Ok(minicbor::decode(bytes)?)
    }

    /// Single-frame textual UR, `ur:eth-signature/...`
    pub fn to_ur(&self) -> Result<String> {
        Ok(encode_single(ETH_SIGNATURE_UR_TYPE, &self.to_cbor()?))
    }
}

impl<C> Encode<C> for EthSignature {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> std::result::Result<(), encode::Error<W::Error>> {
        e.map(if self.request_id.is_some() { 3 } else { 2 })?;
        if let Some(request_id) = &self.request_id {
            e.u8(1)?.tag(Tag::new(UUID_TAG))?.bytes(request_id.as_bytes())?;
        }
        e.u8(2)?.bytes(&self.signature)?;
        e.u8(3)?.str(&self.origin)?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for EthSignature {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> std::result::Result<Self, decode::Error> {
        let mut request_id = None;
        let mut signature = None;
        let mut origin = None;

        let entries = d
            .map()?
            .ok_or_else(|| decode::Error::message("indefinite signature map"))?;
        for _ in 0..entries {
            match d.u64()? {
                1 => {
                    let tag = d.tag()?;
                    if tag.as_u64() != UUID_TAG {
                        return Err(decode::Error::message("request id is not a UUID"));
                    }
                    let id = Uuid::from_slice(d.bytes()?)
                        .map_err(|_| decode::Error::message("request id is not 16 bytes"))?;
                    request_id = Some(id);
                }
                2 => signature = Some(d.bytes()?.to_vec()),
                3 => origin = Some(d.str()?.to_owned()),
                _ => d.skip()?,
            }
        }

        Ok(Self {
            request_id,
            signature: signature.ok_or_else(|| decode::Error::message("missing signature"))?,
            origin: origin.unwrap_or_default(),
        })
    }
}

/// Parse the card template `A0 { 80 pubkey(65), 30 { 02 r, 02 s } }`
pub fn parse_signature_template(raw: &[u8]) -> Result<([u8; 65], [u8; 32], [u8; 32])> {
    let mut reader = TlvReader::new(raw)?;
    reader.enter_constructed(tags::TEMPLATE_SIGNATURE)?;

    let public_key: [u8; 65] = reader
        .read_primitive(tags::ECC_PUBLIC_KEY)?
        .try_into()
        .map_err(|_| Error::InvalidPublicKey)?;

    reader.enter_constructed(tags::ECDSA_SIGNATURE)?;
    let r = normalize_integer(&reader.read_primitive(tags::OTHER)?)?;
    let s = normalize_integer(&reader.read_primitive(tags::OTHER)?)?;

    Ok((public_key, r, s))
}

/// Compress an uncompressed SEC1 point: `02`/`03` by y parity, then x
pub fn compress_public_key(public_key: &[u8; 65]) -> Result<[u8; 33]> {
    if public_key[0] != 0x04 {
        return Err(Error::InvalidPublicKey);
    }

    let mut compressed = [0u8; 33];
    compressed[0] = if public_key[64] & 1 == 0 { 0x02 } else { 0x03 };
    compressed[1..].copy_from_slice(&public_key[1..33]);
    Ok(compressed)
}

/// Recover the signature components, fixing the recovery id by trial recovery.
///
/// `s` is normalized to the low half of the curve order first.
pub fn recover_components(raw: &[u8], hash: &B256) -> Result<SignatureComponents> {
    let (public_key, r, s) = parse_signature_template(raw)?;
    let compressed_public_key = compress_public_key(&public_key)?;

    let mut signature = Signature::from_scalars(r, s)?;
    if let Some(normalized) = signature.normalize_s() {
        debug!("Normalized high-s signature from card");
        signature = normalized;
    }

    let recovery_id = (0u8..=1)
        .find(|candidate| {
            RecoveryId::from_byte(*candidate)
                .and_then(|id| {
                    VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, id).ok()
                })
                .is_some_and(|key| {
                    key.to_encoded_point(true).as_bytes() == compressed_public_key.as_slice()
                })
        })
        .ok_or(Error::RecoveryIdNotFound)?;

    let (r, s) = signature.split_bytes();
    Ok(SignatureComponents {
        r: r.into(),
        s: s.into(),
        recovery_id,
        compressed_public_key,
    })
}

/// Ethereum `v` for the request kind
pub fn recovery_byte(data_type: Option<DataType>, chain_id: Option<u64>, recovery_id: u8) -> u128 {
    let recovery_id = u128::from(recovery_id);
    match data_type {
        Some(DataType::LegacyTx) => 35 + 2 * u128::from(chain_id.unwrap_or(0)) + recovery_id,
        Some(DataType::Eip1559Tx) => recovery_id,
        Some(DataType::TypedData | DataType::PersonalMessage) | None => 27 + recovery_id,
    }
}

/// Minimal big-endian bytes, never empty
pub fn encode_v(v: u128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[start..].to_vec()
}

/// Build the `eth-signature` for a raw card signature over `hash`
pub fn assemble(
    raw: &[u8],
    hash: &B256,
    data_type: Option<DataType>,
    chain_id: Option<u64>,
    request_id: Option<Uuid>,
) -> Result<EthSignature> {
    let components = recover_components(raw, hash)?;
    let v = recovery_byte(data_type, chain_id, components.recovery_id);
    debug!(
        recovery_id = components.recovery_id,
        v = %v,
        "Assembled signature"
    );

    let mut signature = Vec::with_capacity(65);
    signature.extend_from_slice(&components.r);
    signature.extend_from_slice(&components.s);
    signature.extend(encode_v(v));

    Ok(EthSignature {
        request_id,
        signature,
        origin: ORIGIN.to_owned(),
    })
}
