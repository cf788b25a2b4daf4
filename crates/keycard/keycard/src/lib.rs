//! Keycard applet command set for host-side signing sessions.
//!
//! Covers applet selection, pairing, the SCP secure channel, PIN verification
//! and path-scoped signing over any byte-oriented [`CardTransport`].

mod apdu;
mod command_set;
mod commands;
mod constants;
mod crypto;
mod error;
mod secure_channel;
mod types;

#[cfg(test)]
mod simulator;

pub use apdu::{CardTransport, Command, Response, StatusWord, status};
pub use command_set::{CommandChannel, KeycardCommandSet};
pub use commands::*;
pub use constants::*;
pub use crypto::{Challenge, Cryptogram, KeycardScp, PairingToken};
pub use error::{Error, Result, TransportError};
pub use types::{ApplicationInfo, PairingInfo, Version};

