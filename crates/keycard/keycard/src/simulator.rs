//! In-memory Keycard applet speaking the real pairing and secure channel crypto.

use bytes::{Bytes, BytesMut};
use cipher::{Iv, Key};
use k256::{
    PublicKey, SecretKey,
    ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner},
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::{RngCore, rng};

use crate::apdu::{CardTransport, StatusWord, status};
use crate::constants::{DEFAULT_PAIRING_PASSWORD, ins, tags};
use crate::crypto::{
    ApduMeta, Challenge, KeycardScp, PairingToken, calculate_cryptogram, calculate_mac,
    decrypt_data, derive_pairing_key, derive_session_keys, encrypt_data,
    generate_ecdh_shared_secret, generate_pairing_token,
};
use crate::error::TransportError;

/// SELECT response template for an initialised card with no key loaded
pub(crate) fn select_response(instance_uid: [u8; 16], public_key: &PublicKey) -> Vec<u8> {
    let point = public_key.to_encoded_point(false);

    let mut body = Vec::new();
    body.extend([tags::INSTANCE_UID, 16]);
    body.extend(instance_uid);
    body.extend([tags::ECC_PUBLIC_KEY, 65]);
    body.extend(point.as_bytes());
    body.extend([tags::OTHER, 2, 3, 1]);
    body.extend([tags::OTHER, 1, 4]);
    body.extend([tags::KEY_UID, 0]);
    body.extend([tags::CAPABILITIES, 1, 0x0F]);

    let mut out = vec![tags::TEMPLATE_APPLICATION_INFO, body.len() as u8];
    out.extend(body);
    out
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

/// Signature template as returned by SIGN: `A0 { 80 pubkey, 30 { 02 r, 02 s } }`
pub(crate) fn signature_template(public_key: &[u8], signature: &Signature) -> Vec<u8> {
    let (r, s) = signature.split_bytes();

    let mut ecdsa = der_integer(&r);
    ecdsa.extend(der_integer(&s));

    let mut body = vec![tags::ECC_PUBLIC_KEY, public_key.len() as u8];
    body.extend(public_key);
    body.extend([tags::ECDSA_SIGNATURE, ecdsa.len() as u8]);
    body.extend(ecdsa);

    let mut out = vec![tags::TEMPLATE_SIGNATURE];
    if body.len() < 0x80 {
        out.push(body.len() as u8);
    } else {
        out.extend([0x81, body.len() as u8]);
    }
    out.extend(body);
    out
}

struct CardChannel {
    enc: Key<KeycardScp>,
    mac: Key<KeycardScp>,
    iv: Iv<KeycardScp>,
    authenticated: bool,
}

pub(crate) struct CardSimulator {
    instance_uid: [u8; 16],
    identity: SecretKey,
    signing_key: SigningKey,
    pairing_token: PairingToken,
    pairings: Vec<Option<Key<KeycardScp>>>,
    card_challenge: Option<Challenge>,
    channel: Option<CardChannel>,
    pin: String,
    pin_attempts: u8,
    pin_verified: bool,
    present: bool,
    last_signed: Option<([u8; 32], Vec<u8>)>,
}

impl CardSimulator {
    pub(crate) const PAIRING_SLOTS: usize = 4;

    pub(crate) fn new(pin: &str) -> Self {
        let mut instance_uid = [0u8; 16];
        rng().fill_bytes(&mut instance_uid);

        Self {
            instance_uid,
            identity: SecretKey::random(&mut rand_v8::thread_rng()),
            signing_key: SigningKey::random(&mut rand_v8::thread_rng()),
            pairing_token: generate_pairing_token(DEFAULT_PAIRING_PASSWORD),
            pairings: vec![None; Self::PAIRING_SLOTS],
            card_challenge: None,
            channel: None,
            pin: pin.to_owned(),
            pin_attempts: 3,
            pin_verified: false,
            present: true,
            last_signed: None,
        }
    }

    /// Take the card out of the field
    pub(crate) const fn remove(&mut self) {
        self.present = false;
    }

    pub(crate) fn last_signed(&self) -> Option<([u8; 32], Vec<u8>)> {
        self.last_signed.clone()
    }

    fn process(&mut self, apdu: &[u8]) -> Vec<u8> {
        if apdu.len() < 4 {
            return status_only(status::SW_WRONG_DATA);
        }
        let (cla, ins, p1, p2) = (apdu[0], apdu[1], apdu[2], apdu[3]);
        let data = match &apdu[4..] {
            [lc, rest @ ..] if rest.len() >= *lc as usize => &rest[..*lc as usize],
            _ => &[][..],
        };

        match ins {
            ins::SELECT => {
                self.channel = None;
                self.pin_verified = false;
                let mut out = select_response(self.instance_uid, &self.identity.public_key());
                out.extend([0x90, 0x00]);
                out
            }
            ins::PAIR => self.pair(p1, data),
            ins::OPEN_SECURE_CHANNEL => self.open_secure_channel(p1, data),
            _ => self.secured(cla, ins, p1, p2, data),
        }
    }

    fn pair(&mut self, stage: u8, data: &[u8]) -> Vec<u8> {
        if data.len() != 32 {
            return status_only(status::SW_WRONG_DATA);
        }

        if stage == 0 {
            let mut card_challenge = Challenge::default();
            rng().fill_bytes(&mut card_challenge);
            self.card_challenge = Some(card_challenge);

            let mut out =
                calculate_cryptogram(&self.pairing_token, Challenge::from_slice(data)).to_vec();
            out.extend(card_challenge);
            out.extend([0x90, 0x00]);
            return out;
        }

        let Some(card_challenge) = self.card_challenge.take() else {
            return status_only(status::SW_CONDITIONS_NOT_SATISFIED);
        };
        if calculate_cryptogram(&self.pairing_token, &card_challenge).as_slice() != data {
            return status_only(status::SW_SECURITY_STATUS_NOT_SATISFIED);
        }
        let Some(index) = self.pairings.iter().position(Option::is_none) else {
            return status_only(status::SW_FILE_FULL);
        };

        let mut salt = Challenge::default();
        rng().fill_bytes(&mut salt);
        self.pairings[index] = Some(derive_pairing_key(&self.pairing_token, &salt));

        let mut out = vec![index as u8];
        out.extend(salt);
        out.extend([0x90, 0x00]);
        out
    }

    fn open_secure_channel(&mut self, index: u8, data: &[u8]) -> Vec<u8> {
        self.channel = None;
        self.pin_verified = false;

        let Some(Some(pairing_key)) = self.pairings.get(index as usize).cloned() else {
            return status_only(status::SW_INCORRECT_P1P2);
        };
        let Ok(host_key) = PublicKey::from_sec1_bytes(data) else {
            return status_only(status::SW_WRONG_DATA);
        };

        let mut salt = Challenge::default();
        rng().fill_bytes(&mut salt);
        let mut iv = Iv::<KeycardScp>::default();
        rng().fill_bytes(&mut iv);

        let secret = generate_ecdh_shared_secret(&self.identity, &host_key);
        let (enc, mac) = derive_session_keys(secret, &pairing_key, &salt);
        self.channel = Some(CardChannel {
            enc,
            mac,
            iv,
            authenticated: false,
        });

        let mut out = salt.to_vec();
        out.extend(iv);
        out.extend([0x90, 0x00]);
        out
    }

    fn secured(&mut self, cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Vec<u8> {
        let Some(channel) = self.channel.as_mut() else {
            return status_only(status::SW_CONDITIONS_NOT_SATISFIED);
        };
        if data.len() < 32 {
            return status_only(status::SW_WRONG_DATA);
        }

        let (cmac, encrypted) = data.split_at(16);
        let mut meta = ApduMeta::default();
        meta[..5].copy_from_slice(&[cla, ins, p1, p2, data.len() as u8]);
        let Ok(expected) = calculate_mac(&meta, encrypted, &channel.mac) else {
            return status_only(status::SW_WRONG_DATA);
        };
        if expected.as_slice() != cmac {
            self.channel = None;
            return status_only(status::SW_SECURITY_STATUS_NOT_SATISFIED);
        }
        let Ok(plain) = decrypt_data(&mut BytesMut::from(encrypted), &channel.enc, &channel.iv)
        else {
            self.channel = None;
            return status_only(status::SW_WRONG_DATA);
        };
        channel.iv = expected;

        let authenticated = channel.authenticated;
        let (payload, sw) = match ins {
            ins::MUTUALLY_AUTHENTICATE => {
                channel.authenticated = true;
                let mut cryptogram = [0u8; 32];
                rng().fill_bytes(&mut cryptogram);
                (cryptogram.to_vec(), status::SW_NO_ERROR)
            }
            _ if !authenticated => (Vec::new(), status::SW_SECURITY_STATUS_NOT_SATISFIED),
            ins::VERIFY_PIN => (Vec::new(), self.verify_pin(&plain)),
            ins::SIGN => self.sign(&plain),
            _ => (Vec::new(), StatusWord::new(0x6D, 0x00)),
        };

        self.wrap(payload, sw)
    }

    fn verify_pin(&mut self, pin: &[u8]) -> StatusWord {
        if self.pin_attempts == 0 {
            return status::SW_PIN_BLOCKED;
        }
        if pin == self.pin.as_bytes() {
            self.pin_attempts = 3;
            self.pin_verified = true;
            status::SW_NO_ERROR
        } else {
            self.pin_attempts -= 1;
            self.pin_verified = false;
            StatusWord::new(0x63, 0xC0 | self.pin_attempts)
        }
    }

    fn sign(&mut self, data: &[u8]) -> (Vec<u8>, StatusWord) {
        if !self.pin_verified {
            return (Vec::new(), status::SW_CONDITIONS_NOT_SATISFIED);
        }
        if data.len() < 32 {
            return (Vec::new(), status::SW_WRONG_DATA);
        }
        let (hash, path) = data.split_at(32);
        let Ok(signature) = PrehashSigner::<Signature>::sign_prehash(&self.signing_key, hash)
        else {
            return (Vec::new(), status::SW_WRONG_DATA);
        };

        let mut signed = [0u8; 32];
        signed.copy_from_slice(hash);
        self.last_signed = Some((signed, path.to_vec()));

        let public_key = self.signing_key.verifying_key().to_encoded_point(false);
        (
            signature_template(public_key.as_bytes(), &signature),
            status::SW_NO_ERROR,
        )
    }

    fn wrap(&mut self, mut payload: Vec<u8>, sw: StatusWord) -> Vec<u8> {
        let Some(channel) = self.channel.as_mut() else {
            return status_only(sw);
        };
        payload.extend([sw.sw1, sw.sw2]);

        let Ok(encrypted) = encrypt_data(&mut BytesMut::from(&payload[..]), &channel.enc, &channel.iv)
        else {
            return status_only(status::SW_WRONG_DATA);
        };
        let mut meta = ApduMeta::default();
        meta[0] = (encrypted.len() + 16) as u8;
        let Ok(rmac) = calculate_mac(&meta, &encrypted, &channel.mac) else {
            return status_only(status::SW_WRONG_DATA);
        };
        channel.iv = rmac;

        let mut out = rmac.to_vec();
        out.extend_from_slice(&encrypted);
        out.extend([0x90, 0x00]);
        out
    }
}

impl CardTransport for CardSimulator {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.present {
            return Err(TransportError::ConnectionLost);
        }
        Ok(Bytes::from(self.process(command)))
    }
}

fn status_only(sw: StatusWord) -> Vec<u8> {
    vec![sw.sw1, sw.sw2]
}
