use bytes::Bytes;
use coins_bip32::path::DerivationPath;
use k256::{PublicKey, SecretKey};
use rand::{RngCore, rng};
use tracing::{debug, trace};

use crate::apdu::{CardTransport, Command, Response};
use crate::commands::{
    MutuallyAuthenticateCommand, OpenSecureChannelCommand, PairCommand, PairOk, SelectCommand,
    SignCommand, VerifyPinCommand,
};
use crate::constants::KEYCARD_AID;
use crate::crypto::{
    Challenge, calculate_cryptogram, derive_pairing_key, generate_ecdh_shared_secret,
    generate_pairing_token,
};
use crate::secure_channel::SecureChannel;
use crate::types::{ApplicationInfo, PairingInfo};
use crate::{Error, Result};

/// Command/response primitives a signing session drives, in order:
/// select, pair (first contact only), open secure channel, verify PIN, sign.
pub trait CommandChannel {
    /// Select the Keycard applet and parse its application info
    fn select(&mut self) -> Result<ApplicationInfo>;

    /// Pair with the card using the pairing password
    fn pair(&mut self, password: &str) -> Result<PairingInfo>;

    /// Open the secure channel with an existing pairing and mutually authenticate
    fn open_secure_channel(&mut self, pairing: &PairingInfo) -> Result<()>;

    /// Verify the user PIN over the secure channel
    fn verify_pin(&mut self, pin: &str) -> Result<()>;

    /// Sign a 32-byte hash with the key at `path`, returning the raw signature template
    fn sign(&mut self, hash: &[u8; 32], path: &DerivationPath) -> Result<Bytes>;
}

impl<C: CommandChannel + ?Sized> CommandChannel for &mut C {
    fn select(&mut self) -> Result<ApplicationInfo> {
        (**self).select()
    }

    fn pair(&mut self, password: &str) -> Result<PairingInfo> {
        (**self).pair(password)
    }

    fn open_secure_channel(&mut self, pairing: &PairingInfo) -> Result<()> {
        (**self).open_secure_channel(pairing)
    }

    fn verify_pin(&mut self, pin: &str) -> Result<()> {
        (**self).verify_pin(pin)
    }

    fn sign(&mut self, hash: &[u8; 32], path: &DerivationPath) -> Result<Bytes> {
        (**self).sign(hash, path)
    }
}

/// Keycard command set over a raw card transport
#[derive(Debug)]
pub struct KeycardCommandSet<T> {
    transport: T,
    card_public_key: Option<PublicKey>,
    secure_channel: Option<SecureChannel>,
}

impl<T: CardTransport> KeycardCommandSet<T> {
    /// Wrap a transport. Nothing is sent until [`CommandChannel::select`].
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            card_public_key: None,
            secure_channel: None,
        }
    }

    /// Whether secured commands can be sent
    pub const fn is_secure_channel_open(&self) -> bool {
        self.secure_channel.is_some()
    }

    /// Drop the session keys and return the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn transmit(&mut self, command: &Command) -> Result<Response> {
        trace!(ins = command.ins, p1 = command.p1, "Transmitting command");
        let raw = self.transport.transmit_raw(&command.to_bytes()?)?;
        Response::from_bytes(&raw)
    }

    fn transmit_secure(&mut self, command: &Command) -> Result<Response> {
        let channel = self
            .secure_channel
            .as_mut()
            .ok_or(Error::SecureChannelNotOpen)?;

        let protected = channel.protect(command)?.to_bytes()?;
        trace!(ins = command.ins, "Transmitting protected command");
        let raw = match self.transport.transmit_raw(&protected) {
            Ok(raw) => raw,
            Err(e) => {
                self.secure_channel = None;
                return Err(e.into());
            }
        };

        let result = Response::from_bytes(&raw).and_then(|response| channel.unprotect(response));
        if result.is_err() {
            // The IV chain is broken, the channel cannot be reused
            self.secure_channel = None;
        }
        result
    }
}

impl<T: CardTransport> CommandChannel for KeycardCommandSet<T> {
    fn select(&mut self) -> Result<ApplicationInfo> {
        self.secure_channel = None;
        self.card_public_key = None;

        let response = self.transmit(&SelectCommand::with_aid(KEYCARD_AID))?;
        let info = SelectCommand::parse_response(response)?;
        debug!(
            instance_uid = %info.instance_uid_hex(),
            version = %info.version,
            remaining_slots = info.remaining_slots,
            "Selected Keycard applet"
        );

        self.card_public_key = info.public_key.clone();
        Ok(info)
    }

    fn pair(&mut self, password: &str) -> Result<PairingInfo> {
        let token = generate_pairing_token(password);

        let mut challenge = Challenge::default();
        rng().fill_bytes(&mut challenge);

        let response = self.transmit(&PairCommand::with_first_stage(&challenge))?;
        let PairOk::FirstStageSuccess {
            cryptogram: card_cryptogram,
            challenge: card_challenge,
        } = PairCommand::parse_response(response)?
        else {
            return Err(Error::InvalidData("Unexpected PAIR first stage response"));
        };

        if calculate_cryptogram(&token, &challenge) != card_cryptogram {
            return Err(Error::PairingFailed(
                "card cryptogram mismatch, wrong pairing password",
            ));
        }

        let client_cryptogram = calculate_cryptogram(&token, &card_challenge);
        let response = self.transmit(&PairCommand::with_final_stage(&client_cryptogram))?;
        let PairOk::FinalStageSuccess {
            pairing_index,
            salt,
        } = PairCommand::parse_response(response)?
        else {
            return Err(Error::InvalidData("Unexpected PAIR final stage response"));
        };

        debug!(pairing_index, "Paired with card");
        Ok(PairingInfo {
            key: derive_pairing_key(&token, &salt),
            index: pairing_index,
        })
    }

    fn open_secure_channel(&mut self, pairing: &PairingInfo) -> Result<()> {
        self.secure_channel = None;
        let card_public_key = self
            .card_public_key
            .as_ref()
            .ok_or(Error::NoSecureChannelKey)?;

        let ephemeral = SecretKey::random(&mut rand_v8::thread_rng());
        let shared_secret = generate_ecdh_shared_secret(&ephemeral, card_public_key);

        let response = self.transmit(&OpenSecureChannelCommand::with_pairing_index_and_pubkey(
            pairing.index,
            &ephemeral.public_key(),
        ))?;
        let payload = OpenSecureChannelCommand::parse_response(response, pairing.index)?;
        self.secure_channel = Some(SecureChannel::from_open_response(
            shared_secret,
            &pairing.key,
            &payload,
        )?);

        let mut challenge = Challenge::default();
        rng().fill_bytes(&mut challenge);

        let authenticated = self
            .transmit_secure(&MutuallyAuthenticateCommand::with_challenge(&challenge))
            .and_then(MutuallyAuthenticateCommand::parse_response);

        match authenticated {
            Ok(_) => {
                debug!(pairing_index = pairing.index, "Secure channel open");
                Ok(())
            }
            Err(e) => {
                self.secure_channel = None;
                debug!(error = %e, "Mutual authentication failed");
                match e {
                    Error::InvalidMac => Err(Error::MutualAuthenticationFailed),
                    other => Err(other),
                }
            }
        }
    }

    fn verify_pin(&mut self, pin: &str) -> Result<()> {
        let response = self.transmit_secure(&VerifyPinCommand::with_pin(pin))?;
        VerifyPinCommand::parse_response(response)
    }

    fn sign(&mut self, hash: &[u8; 32], path: &DerivationPath) -> Result<Bytes> {
        debug!(path = %path.derivation_string(), "Signing hash");
        let response = self.transmit_secure(&SignCommand::with(hash, path))?;
        SignCommand::parse_response(response)
    }
}
