//! Keycard secure channel session.
//!
//! Once OPEN SECURE CHANNEL succeeds every command is AES-256-CBC encrypted
//! with the session encryption key and authenticated with a CBC-MAC over the
//! APDU header and ciphertext. Each MAC becomes the IV of the next message, so
//! commands and responses are chained and the state must never be reused.

use std::fmt;

use bytes::BytesMut;
use cipher::{Iv, Key};
use k256::ecdh::SharedSecret;
use tracing::{trace, warn};
use zeroize::Zeroize;

use crate::apdu::{Command, Response};
use crate::crypto::{
    ApduMeta, Challenge, KeycardScp, calculate_mac, decrypt_data, derive_session_keys,
    encrypt_data,
};
use crate::{Error, Result};

const MAC_LEN: usize = 16;

/// Length of the OPEN SECURE CHANNEL response: salt followed by the first IV
pub(crate) const OPEN_RESPONSE_LEN: usize = 32 + MAC_LEN;

/// Encryption and MAC keys of one session
struct SessionKeys {
    enc: Key<KeycardScp>,
    mac: Key<KeycardScp>,
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.enc.as_mut_slice().zeroize();
        self.mac.as_mut_slice().zeroize();
    }
}

/// State of an open secure channel
pub(crate) struct SecureChannel {
    keys: SessionKeys,
    iv: Iv<KeycardScp>,
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel").finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Derive the session from the ECDH secret, the pairing key and the card's
    /// OPEN SECURE CHANNEL response (`salt | iv`).
    pub(crate) fn from_open_response(
        secret: SharedSecret,
        pairing_key: &Key<KeycardScp>,
        payload: &[u8],
    ) -> Result<Self> {
        if payload.len() != OPEN_RESPONSE_LEN {
            return Err(Error::InvalidData("Invalid OPEN SECURE CHANNEL response length"));
        }

        let salt = Challenge::from_slice(&payload[..32]);
        let iv = Iv::<KeycardScp>::clone_from_slice(&payload[32..]);
        let (enc, mac) = derive_session_keys(secret, pairing_key, salt);

        Ok(Self {
            keys: SessionKeys { enc, mac },
            iv,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_raw(
        enc: &Key<KeycardScp>,
        mac: &Key<KeycardScp>,
        iv: &Iv<KeycardScp>,
    ) -> Self {
        Self {
            keys: SessionKeys {
                enc: *enc,
                mac: *mac,
            },
            iv: *iv,
        }
    }

    #[cfg(test)]
    pub(crate) const fn iv(&self) -> &Iv<KeycardScp> {
        &self.iv
    }

    /// Encrypt and MAC a command for transmission.
    pub(crate) fn protect(&mut self, command: &Command) -> Result<Command> {
        let mut plaintext = BytesMut::from(command.payload());
        let encrypted = encrypt_data(&mut plaintext, &self.keys.enc, &self.iv)?;
        let lc = u8::try_from(encrypted.len() + MAC_LEN)
            .map_err(|_| Error::InvalidData("Command too long for the secure channel"))?;

        let mut meta = ApduMeta::default();
        meta[0] = command.cla;
        meta[1] = command.ins;
        meta[2] = command.p1;
        meta[3] = command.p2;
        meta[4] = lc;

        self.iv = calculate_mac(&meta, &encrypted, &self.keys.mac)?;

        let mut data = BytesMut::with_capacity(MAC_LEN + encrypted.len());
        data.extend_from_slice(&self.iv);
        data.extend_from_slice(&encrypted);

        trace!(
            ins = command.ins,
            len = data.len(),
            "Protected secure channel command"
        );

        Ok(command.clone().with_data(data.freeze()))
    }

    /// Verify and decrypt a response, returning the inner response APDU.
    ///
    /// Error status words are not wrapped by the card and pass through as-is.
    pub(crate) fn unprotect(&mut self, response: Response) -> Result<Response> {
        if !response.is_success() || response.payload().is_empty() {
            return Ok(response);
        }

        let payload = response.payload();
        if payload.len() < MAC_LEN {
            warn!(len = payload.len(), "Response too short for secure channel");
            return Err(Error::InvalidData("Secure channel response too short"));
        }

        let (rmac, rdata) = payload.split_at(MAC_LEN);

        let mut meta = ApduMeta::default();
        meta[0] = u8::try_from(payload.len())
            .map_err(|_| Error::InvalidData("Secure channel response too long"))?;

        let decrypted = decrypt_data(&mut BytesMut::from(rdata), &self.keys.enc, &self.iv)?;

        self.iv = calculate_mac(&meta, rdata, &self.keys.mac)?;
        if rmac != self.iv.as_slice() {
            warn!("MAC verification failed for secure channel response");
            return Err(Error::InvalidMac);
        }

        Response::from_bytes(&decrypted)
    }
}
