use aes::cipher::{
    BlockDecryptMut, BlockEncryptMut, Iv, IvSizeUser, Key, KeyIvInit, KeySizeUser,
    block_padding::Iso7816,
    typenum::{U16, U32},
};
use bytes::{Bytes, BytesMut};
use generic_array::GenericArray;
use k256::{PublicKey, SecretKey, ecdh::SharedSecret};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256, Sha512};
use unicode_normalization::UnicodeNormalization;

use crate::Result;

/// PBKDF2 salt of the pairing token
pub const PAIRING_TOKEN_SALT: &str = "Keycard Pairing Password Salt";
const PAIRING_TOKEN_ROUNDS: u32 = 50_000;

/// Pairing token derived from the pairing password
pub type PairingToken = GenericArray<u8, U32>;
/// SHA-256 proof exchanged during pairing and authentication
pub type Cryptogram = GenericArray<u8, U32>;
/// Random 32-byte challenge or salt
pub type Challenge = GenericArray<u8, U32>;
pub(crate) type ApduMeta = GenericArray<u8, U16>;

type Encryptor = cbc::Encryptor<aes::Aes256>;
type Decryptor = cbc::Decryptor<aes::Aes256>;

/// Key and IV sizes of the Keycard secure channel (AES-256-CBC)
#[derive(Debug)]
pub struct KeycardScp;

impl KeySizeUser for KeycardScp {
    type KeySize = U32;
}

impl IvSizeUser for KeycardScp {
    type IvSize = U16;
}

pub(crate) fn generate_ecdh_shared_secret(private: &SecretKey, public: &PublicKey) -> SharedSecret {
    k256::elliptic_curve::ecdh::diffie_hellman(private.to_nonzero_scalar(), public.as_affine())
}

/// Cryptogram exchanged during PAIR: `SHA-256(shared_secret | challenge)`.
pub(crate) fn calculate_cryptogram(shared_secret: &PairingToken, challenge: &Challenge) -> Cryptogram {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update(challenge);
    hasher.finalize()
}

/// Pairing key persisted after a successful PAIR: `SHA-256(shared_secret | salt)`.
pub(crate) fn derive_pairing_key(shared_secret: &PairingToken, salt: &Challenge) -> Key<KeycardScp> {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update(salt);
    hasher.finalize()
}

/// Derive session keys from the shared secret, pairing key, and challenge.
///
/// (K(E) | K(M)) = SHA-512(shared_secret | pairing_key | challenge)
pub(crate) fn derive_session_keys(
    secret: SharedSecret,
    pairing_key: &Key<KeycardScp>,
    challenge: &Challenge,
) -> (Key<KeycardScp>, Key<KeycardScp>) {
    let mut hasher = Sha512::new();
    hasher.update(secret.raw_secret_bytes());
    hasher.update(pairing_key);
    hasher.update(challenge);
    let data = hasher.finalize();

    let enc_key = Key::<KeycardScp>::clone_from_slice(&data[0..32]);
    let mac_key = Key::<KeycardScp>::clone_from_slice(&data[32..64]);

    (enc_key, mac_key)
}

/// Encrypt data with ISO 7816 padding.
pub(crate) fn encrypt_data(
    data: &mut BytesMut,
    enc_key: &Key<KeycardScp>,
    iv: &Iv<KeycardScp>,
) -> Result<Bytes> {
    let msg_len = prepare_padding(data);
    let encrypted = Encryptor::new(enc_key, iv).encrypt_padded_mut::<Iso7816>(data, msg_len)?;
    Ok(Bytes::copy_from_slice(encrypted))
}

/// Decrypt data and strip its ISO 7816 padding.
pub(crate) fn decrypt_data(
    data: &mut BytesMut,
    enc_key: &Key<KeycardScp>,
    iv: &Iv<KeycardScp>,
) -> Result<Bytes> {
    let decrypted = Decryptor::new(enc_key, iv).decrypt_padded_mut::<Iso7816>(data)?;
    Ok(Bytes::copy_from_slice(decrypted))
}

/// CBC-MAC over `meta | data` with a zero IV. The result also becomes the next IV.
pub(crate) fn calculate_mac(
    meta: &ApduMeta,
    data: &[u8],
    mac_key: &Key<KeycardScp>,
) -> Result<Iv<KeycardScp>> {
    let iv = Iv::<KeycardScp>::default();

    let mut buf = BytesMut::with_capacity(meta.len() + data.len() + 16);
    buf.extend_from_slice(meta.as_slice());
    buf.extend_from_slice(data);

    let msg_len = prepare_padding(&mut buf);
    let ciphertext = Encryptor::new(mac_key, &iv).encrypt_padded_mut::<Iso7816>(&mut buf, msg_len)?;

    // `data` is block aligned, so the final block is pure padding
    Ok(*Iv::<KeycardScp>::from_slice(
        &ciphertext[ciphertext.len() - 32..ciphertext.len() - 16],
    ))
}

/// Pairing token derived from the pairing password with PBKDF2-HMAC-SHA256.
pub(crate) fn generate_pairing_token(password: &str) -> PairingToken {
    let password = password.nfkd().collect::<String>();
    let salt = PAIRING_TOKEN_SALT.nfkd().collect::<String>();

    let mut token = PairingToken::default();
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        PAIRING_TOKEN_ROUNDS,
        &mut token,
    );

    token
}

// Grow the buffer so ISO 7816 padding always fits
fn prepare_padding(data: &mut BytesMut) -> usize {
    let len = data.len();
    data.resize(len + 16 - len % 16, 0);

    len
}
