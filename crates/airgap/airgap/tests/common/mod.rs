//! Test doubles for a Keycard in the field and the contactless reader.

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;

use bytes::Bytes;
use coins_bip32::path::DerivationPath;
use k256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use minicbor::{Encoder, data::Tag};
use nexum_airgap::keycard::{
    ApplicationInfo, CommandChannel, DEFAULT_PAIRING_PASSWORD, Error, PairingInfo, Result,
    Version,
};
use nexum_airgap::request::{KEYPATH_TAG, UUID_TAG};
use nexum_airgap::{EventBus, NfcController, NfcEvent, Subscription};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug)]
pub struct CardState {
    pub instance_uid: [u8; 16],
    pub signing_key: SigningKey,
    pub pin: String,
    pub pin_attempts: u8,
    pub pairings: Vec<u8>,
    pub next_slot: u8,
    pub channel_open: bool,
    pub pin_verified: bool,
    /// Commands in the order the card received them
    pub log: Vec<&'static str>,
    pub signed: Vec<([u8; 32], String)>,
}

/// Card whose state outlives the channels handed to sessions
#[derive(Debug, Clone)]
pub struct FakeCard {
    state: Arc<Mutex<CardState>>,
}

impl FakeCard {
    pub fn new(pin: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState {
                instance_uid: [0x5c; 16],
                signing_key: SigningKey::random(&mut rand_v8::thread_rng()),
                pin: pin.to_owned(),
                pin_attempts: 3,
                pairings: Vec::new(),
                next_slot: 0,
                channel_open: false,
                pin_verified: false,
                log: Vec::new(),
                signed: Vec::new(),
            })),
        }
    }

    /// A fresh connection to this card
    pub fn channel(&self) -> FakeChannel {
        FakeChannel {
            state: Arc::clone(&self.state),
        }
    }

    pub fn verifying_key(&self) -> k256::ecdsa::VerifyingKey {
        self.state.lock().signing_key.verifying_key().clone()
    }

    /// Forget every pairing, as a factory reset would
    pub fn unpair_all(&self) {
        self.state.lock().pairings.clear();
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.state.lock().log.clone()
    }

    pub fn signed(&self) -> Vec<([u8; 32], String)> {
        self.state.lock().signed.clone()
    }

    pub fn pin_attempts(&self) -> u8 {
        self.state.lock().pin_attempts
    }
}

#[derive(Debug)]
pub struct FakeChannel {
    state: Arc<Mutex<CardState>>,
}

impl CommandChannel for FakeChannel {
    fn select(&mut self) -> Result<ApplicationInfo> {
        let mut state = self.state.lock();
        state.log.push("select");
        state.channel_open = false;
        state.pin_verified = false;

        Ok(ApplicationInfo {
            instance_uid: state.instance_uid,
            public_key: None,
            version: Version { major: 3, minor: 1 },
            remaining_slots: 5 - state.pairings.len() as u8,
            key_uid: Some([0x11; 32]),
        })
    }

    fn pair(&mut self, password: &str) -> Result<PairingInfo> {
        let mut state = self.state.lock();
        state.log.push("pair");
        if password != DEFAULT_PAIRING_PASSWORD {
            return Err(Error::PairingFailed("card cryptogram mismatch"));
        }

        let slot = state.next_slot;
        state.next_slot += 1;
        state.pairings.push(slot);
        Ok(PairingInfo::new([slot + 1; 32], slot))
    }

    fn open_secure_channel(&mut self, pairing: &PairingInfo) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push("open_secure_channel");
        if !state.pairings.contains(&pairing.index) {
            return Err(Error::InvalidPairingIndex(pairing.index));
        }
        state.channel_open = true;
        Ok(())
    }

    fn verify_pin(&mut self, pin: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push("verify_pin");
        if !state.channel_open {
            return Err(Error::SecureChannelNotOpen);
        }
        if state.pin_attempts == 0 {
            return Err(Error::PinBlocked);
        }
        if pin != state.pin {
            state.pin_attempts -= 1;
            return Err(match state.pin_attempts {
                0 => Error::PinBlocked,
                remaining => Error::WrongPin { remaining },
            });
        }
        state.pin_attempts = 3;
        state.pin_verified = true;
        Ok(())
    }

    fn sign(&mut self, hash: &[u8; 32], path: &DerivationPath) -> Result<Bytes> {
        let mut state = self.state.lock();
        state.log.push("sign");
        if !state.pin_verified {
            return Err(Error::SignConditionsNotSatisfied);
        }

        let signature: Signature = state
            .signing_key
            .sign_prehash(hash)
            .map_err(|_| Error::InvalidData("cannot sign"))?;
        let template = signature_template(&state.signing_key, &signature);
        state.signed.push((*hash, path.derivation_string()));
        Ok(Bytes::from(template))
    }
}

fn der_integer(value: &[u8]) -> Vec<u8> {
    let start = value.iter().position(|b| *b != 0).unwrap_or(value.len() - 1);
    let mut digits = value[start..].to_vec();
    if digits[0] & 0x80 != 0 {
        digits.insert(0, 0);
    }
    let mut out = vec![0x02, digits.len() as u8];
    out.extend(digits);
    out
}

/// `A0 { 80 pubkey, 30 { 02 r, 02 s } }`
pub fn signature_template(key: &SigningKey, signature: &Signature) -> Vec<u8> {
    let (r, s) = signature.split_bytes();
    let mut ecdsa = der_integer(&r);
    ecdsa.extend(der_integer(&s));

    let mut body = vec![0x80, 65];
    body.extend(key.verifying_key().to_encoded_point(false).as_bytes());
    body.extend([0x30, ecdsa.len() as u8]);
    body.extend(ecdsa);

    let mut out = vec![0xA0, 0x81, body.len() as u8];
    out.extend(body);
    out
}

/// Reader that hands out [`FakeChannel`]s through an [`EventBus`]
#[derive(Debug, Clone, Default)]
pub struct FakeNfc {
    pub bus: EventBus<FakeChannel>,
    prompts: Arc<Mutex<Vec<String>>>,
    listening: Arc<Mutex<bool>>,
}

impl FakeNfc {
    pub fn tap(&self, card: &FakeCard) -> bool {
        self.bus.publish(NfcEvent::Connected(card.channel()))
    }

    pub fn is_listening(&self) -> bool {
        *self.listening.lock()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl NfcController for FakeNfc {
    type Channel = FakeChannel;

    fn start_listening(&self, prompt: &str) {
        self.prompts.lock().push(prompt.to_owned());
        *self.listening.lock() = true;
    }

    fn stop_listening(&self) {
        *self.listening.lock() = false;
    }

    fn subscribe(&self) -> Subscription<FakeChannel> {
        self.bus.subscribe()
    }
}

/// Fields of an `eth-sign-request` to encode
#[derive(Debug, Clone)]
pub struct RequestFields<'a> {
    pub request_id: Option<Uuid>,
    pub sign_data: &'a [u8],
    pub data_type: Option<u8>,
    pub chain_id: Option<u64>,
    pub path: Option<&'a [(u32, bool)]>,
}

impl Default for RequestFields<'_> {
    fn default() -> Self {
        Self {
            request_id: None,
            sign_data: &[],
            data_type: None,
            chain_id: None,
            path: Some(&[(44, true), (60, true), (0, true), (0, false), (0, false)]),
        }
    }
}

/// CBOR encoding of an `eth-sign-request`
pub fn sign_request(fields: &RequestFields<'_>) -> Vec<u8> {
    let entries = 1
        + u64::from(fields.request_id.is_some())
        + u64::from(fields.data_type.is_some())
        + u64::from(fields.chain_id.is_some())
        + u64::from(fields.path.is_some());

    let mut e = Encoder::new(Vec::new());
    e.map(entries).unwrap();
    if let Some(id) = fields.request_id {
        e.u8(1).unwrap().tag(Tag::new(UUID_TAG)).unwrap();
        e.bytes(id.as_bytes()).unwrap();
    }
    e.u8(2).unwrap().bytes(fields.sign_data).unwrap();
    if let Some(data_type) = fields.data_type {
        e.u8(3).unwrap().u8(data_type).unwrap();
    }
    if let Some(chain_id) = fields.chain_id {
        e.u8(4).unwrap().u64(chain_id).unwrap();
    }
    if let Some(path) = fields.path {
        e.u8(5).unwrap().tag(Tag::new(KEYPATH_TAG)).unwrap();
        e.map(1).unwrap().u8(1).unwrap();
        e.array(path.len() as u64 * 2).unwrap();
        for (index, hardened) in path {
            e.u32(*index).unwrap().bool(*hardened).unwrap();
        }
    }
    e.into_writer()
}
