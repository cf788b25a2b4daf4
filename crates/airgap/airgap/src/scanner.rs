//! Uniform Resources (BCR-2020-005) scanning and single-frame encoding.
//!
//! Animated QR codes carry one fountain-coded fragment per frame:
//! `ur:<type>/<seq>-<total>/<bytewords>`. Static codes are single-part:
//! `ur:<type>/<bytewords>`.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, trace, warn};
use ur::bytewords::{self, Style};

use crate::ParseError;

const SCHEME: &str = "ur:";

/// Textual single-part UR for `payload`
pub fn encode_single(ur_type: &str, payload: &[u8]) -> String {
    format!("{SCHEME}{ur_type}/{}", bytewords::encode(payload, Style::Minimal))
}

/// Outcome of feeding one scanned string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Not a UR, or the scan already finished
    Ignored,
    /// Frame accepted, more are needed
    Progress,
    /// Frame already received
    Duplicate,
    /// Frame refused without touching the accumulated state
    Rejected(String),
    /// The payload is reassembled, or reassembly failed
    Complete,
}

/// Multi-part UR reassembly
pub struct UrScanner {
    decoder: ur::Decoder,
    ur_type: Option<String>,
    received: BTreeSet<u32>,
    expected: Option<u32>,
    result: Option<(String, Vec<u8>)>,
    error: Option<String>,
}

impl fmt::Debug for UrScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrScanner")
            .field("ur_type", &self.ur_type)
            .field("received", &self.received.len())
            .field("expected", &self.expected)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl Default for UrScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl UrScanner {
    /// Scanner waiting for its first frame
    pub fn new() -> Self {
        Self {
            decoder: ur::Decoder::default(),
            ur_type: None,
            received: BTreeSet::new(),
            expected: None,
            result: None,
            error: None,
        }
    }

    /// Feed one scanned string. Re-delivered frames leave the state unchanged.
    pub fn receive(&mut self, scanned: &str) -> ScanOutcome {
        if self.is_complete() {
            return ScanOutcome::Ignored;
        }

        let scanned = scanned.trim().to_ascii_lowercase();
        let Some(rest) = scanned.strip_prefix(SCHEME) else {
            trace!("Ignoring non-UR scan");
            return ScanOutcome::Ignored;
        };

        let parts: Vec<&str> = rest.split('/').collect();
        let (ur_type, sequence) = match parts.as_slice() {
            [ur_type, _] => (*ur_type, None),
            [ur_type, seq, _] => match parse_sequence(seq) {
                Some(sequence) => (*ur_type, Some(sequence)),
                None => return ScanOutcome::Rejected(format!("invalid sequence {seq}")),
            },
            _ => return ScanOutcome::Rejected("malformed UR".to_owned()),
        };

        if let Some(expected_type) = &self.ur_type {
            if expected_type != ur_type {
                warn!(%expected_type, found = ur_type, "Rejecting frame of another UR type");
                return ScanOutcome::Rejected(format!(
                    "UR type {ur_type} does not match {expected_type}"
                ));
            }
        }

        match sequence {
            None => self.receive_single(ur_type, &scanned),
            Some((seq, total)) => self.receive_part(ur_type, seq, total, &scanned),
        }
    }

    fn receive_single(&mut self, ur_type: &str, scanned: &str) -> ScanOutcome {
        match ur::decode(scanned) {
            Ok((_, payload)) => {
                debug!(ur_type, len = payload.len(), "Decoded single-part UR");
                self.ur_type = Some(ur_type.to_owned());
                self.result = Some((ur_type.to_owned(), payload));
            }
            Err(e) => {
                self.error = Some(format!("invalid UR: {e:?}"));
            }
        }
        ScanOutcome::Complete
    }

    fn receive_part(&mut self, ur_type: &str, seq: u32, total: u32, scanned: &str) -> ScanOutcome {
        if self.expected.is_some_and(|expected| expected != total) {
            return ScanOutcome::Rejected(format!("frame belongs to a {total}-part UR"));
        }
        if self.received.contains(&seq) {
            return ScanOutcome::Duplicate;
        }

        if let Err(e) = self.decoder.receive(scanned) {
            debug!(seq, error = ?e, "Rejecting UR fragment");
            return ScanOutcome::Rejected(format!("invalid fragment: {e:?}"));
        }

        self.ur_type.get_or_insert_with(|| ur_type.to_owned());
        self.expected = Some(total);
        self.received.insert(seq);
        trace!(seq, total, received = self.received.len(), "Accepted UR fragment");

        if !self.decoder.complete() {
            return ScanOutcome::Progress;
        }

        match self.decoder.message() {
            Ok(Some(payload)) => {
                debug!(ur_type, len = payload.len(), "Reassembled multi-part UR");
                self.result = Some((ur_type.to_owned(), payload));
            }
            Ok(None) => self.error = Some("decoder finished without a message".to_owned()),
            Err(e) => self.error = Some(format!("reassembly failed: {e:?}")),
        }
        ScanOutcome::Complete
    }

    /// Completion estimate in `0.0..=1.0`
    pub fn progress(&self) -> f64 {
        if self.is_complete() {
            return 1.0;
        }
        match self.expected {
            Some(expected) if expected > 0 => {
                // Fountain decoding may need more than `expected` frames
                (self.received.len() as f64 / expected as f64).min(0.99)
            }
            _ => 0.0,
        }
    }

    /// Distinct frames accepted so far
    pub fn received_frames(&self) -> usize {
        self.received.len()
    }

    /// Frame count announced by a multi-part UR
    pub const fn expected_frames(&self) -> Option<u32> {
        self.expected
    }

    /// Whether scanning finished, successfully or not
    pub const fn is_complete(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Whether a payload was reassembled
    pub const fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// `(ur_type, payload)` once reassembled
    pub fn result(&self) -> Option<(&str, &[u8])> {
        self.result
            .as_ref()
            .map(|(ur_type, payload)| (ur_type.as_str(), payload.as_slice()))
    }

    /// Payload of the expected type
    pub fn payload_of(&self, expected: &'static str) -> Option<Result<&[u8], ParseError>> {
        self.result().map(|(ur_type, payload)| {
            if ur_type == expected {
                Ok(payload)
            } else {
                Err(ParseError::UrType {
                    found: ur_type.to_owned(),
                    expected,
                })
            }
        })
    }

    /// Why scanning failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Discard all frames and start over
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

fn parse_sequence(seq: &str) -> Option<(u32, u32)> {
    let (seq, total) = seq.split_once('-')?;
    let seq = seq.parse().ok()?;
    let total = total.parse().ok()?;
    (seq > 0 && total > 0).then_some((seq, total))
}
