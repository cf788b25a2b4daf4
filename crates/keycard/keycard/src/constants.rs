/// Keycard applet AID
pub const KEYCARD_AID: &[u8] = b"\xA0\x00\x00\x08\x04\x00\x01\x01";

/// Pairing password Keycards ship with until the owner changes it
pub const DEFAULT_PAIRING_PASSWORD: &str = "KeycardDefaultPairing";

/// Class byte of ISO 7816 commands
pub const CLA_ISO7816: u8 = 0x00;
/// Class byte of Keycard commands
pub const CLA_GP: u8 = 0x80;

/// Instruction bytes
pub mod ins {
    /// SELECT
    pub const SELECT: u8 = 0xA4;
    /// OPEN SECURE CHANNEL
    pub const OPEN_SECURE_CHANNEL: u8 = 0x10;
    /// MUTUALLY AUTHENTICATE
    pub const MUTUALLY_AUTHENTICATE: u8 = 0x11;
    /// PAIR
    pub const PAIR: u8 = 0x12;
    /// VERIFY PIN
    pub const VERIFY_PIN: u8 = 0x20;
    /// SIGN
    pub const SIGN: u8 = 0xC0;
}

/// SIGN P1: sign with the currently loaded key
pub const SIGN_CURRENT_KEY: u8 = 0x00;
/// SIGN P1: derive from the master key along the supplied path, without changing the current key
pub const DERIVE_FROM_MASTER: u8 = 0x01;

/// BER-TLV tags of card responses
pub mod tags {
    /// Signature template containing:
    /// - TAG_ECC_PUBLIC_KEY
    /// - TAG_ECDSA_SIGNATURE
    pub const TEMPLATE_SIGNATURE: u8 = 0xA0;
    /// Application info template containing:
    /// - TAG_INSTANCE_UID
    /// - TAG_ECC_PUBLIC_KEY
    /// - TAG_OTHER (application version and number remaining pairing slots)
    /// - TAG_KEY_UID
    /// - TAG_CAPABILITIES
    pub const TEMPLATE_APPLICATION_INFO: u8 = 0xA4;

    /// Instance UID (16 bytes)
    pub const INSTANCE_UID: u8 = 0x8F;
    /// ECC Public Key (Uncompressed, ie. 65 bytes, or 0 bytes if not available)
    pub const ECC_PUBLIC_KEY: u8 = 0x80;
    /// Application version (2 bytes) / number of remaining pairing slots (1 byte)
    pub const OTHER: u8 = 0x02;
    /// Key UID (32 bytes)
    pub const KEY_UID: u8 = 0x8E;
    /// Keycard capabilities (1 byte)
    pub const CAPABILITIES: u8 = 0x8D;
    /// ECDSA signature (then contains an array of TAG_OTHER for the 'R' and 'S' values)
    pub const ECDSA_SIGNATURE: u8 = 0x30;
}
