//! PC/SC contactless reader as an NFC controller.
//!
//! A polling thread watches the reader and turns card presence changes into
//! [`NfcEvent`]s on the bus.

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use alloy_primitives::hex;
use bytes::Bytes;
use nexum_airgap::{EventBus, NfcController, NfcEvent, Subscription};
use nexum_keycard::{CardTransport, KeycardCommandSet, TransportError};
use parking_lot::Mutex;
use pcsc::{Card, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::{debug, info, trace, warn};

/// Command channel to a card on a PC/SC reader
pub(crate) type PcscChannel = KeycardCommandSet<PcscCard>;

/// Connected card on a PC/SC reader
pub(crate) struct PcscCard {
    card: Option<Card>,
    reader: String,
}

impl fmt::Debug for PcscCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscCard")
            .field("reader", &self.reader)
            .field("connected", &self.card.is_some())
            .finish()
    }
}

impl PcscCard {
    const fn new(card: Card, reader: String) -> Self {
        Self {
            card: Some(card),
            reader,
        }
    }
}

impl CardTransport for PcscCard {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let card = self.card.as_mut().ok_or(TransportError::ConnectionLost)?;
        trace!(command = %hex::encode(command), "PC/SC transmit");

        let mut buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
        match card.transmit(command, &mut buffer) {
            Ok(response) => {
                trace!(response = %hex::encode(response), "PC/SC receive");
                Ok(Bytes::copy_from_slice(response))
            }
            Err(pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard) => {
                debug!(reader = %self.reader, "Card left the reader");
                self.card = None;
                Err(TransportError::ConnectionLost)
            }
            Err(e) => Err(TransportError::Other(e.to_string())),
        }
    }
}

impl Drop for PcscCard {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}

struct Poller {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Reader settings for [`PcscNfc`]
#[derive(Debug, Clone)]
pub(crate) struct PollSettings {
    pub(crate) reader: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) tap_timeout: Duration,
}

/// PC/SC reader driven by a background polling thread while listening
pub(crate) struct PcscNfc {
    context: Context,
    settings: PollSettings,
    bus: EventBus<PcscChannel>,
    poller: Mutex<Option<Poller>>,
}

impl fmt::Debug for PcscNfc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscNfc")
            .field("settings", &self.settings)
            .field("listening", &self.poller.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl PcscNfc {
    pub(crate) fn new(settings: PollSettings) -> Result<Self, pcsc::Error> {
        Ok(Self {
            context: Context::establish(Scope::User)?,
            settings,
            bus: EventBus::new(),
            poller: Mutex::new(None),
        })
    }

    /// Names of the connected readers
    pub(crate) fn readers(&self) -> Result<Vec<String>, pcsc::Error> {
        Ok(self
            .context
            .list_readers_owned()?
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

impl NfcController for PcscNfc {
    type Channel = PcscChannel;

    fn start_listening(&self, prompt: &str) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }
        info!("{prompt}");

        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            context: self.context.clone(),
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            stop: Arc::clone(&stop),
        };
        let handle = thread::spawn(move || worker.run());
        *poller = Some(Poller { stop, handle });
    }

    fn stop_listening(&self) {
        let Some(poller) = self.poller.lock().take() else {
            return;
        };
        poller.stop.store(true, Ordering::SeqCst);
        let _ = self.context.cancel();
        if poller.handle.join().is_err() {
            warn!("Reader polling thread panicked");
        }
    }

    fn subscribe(&self) -> Subscription<PcscChannel> {
        self.bus.subscribe()
    }
}

impl Drop for PcscNfc {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

struct Worker {
    context: Context,
    settings: PollSettings,
    bus: EventBus<PcscChannel>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(self) {
        let mut deadline = Instant::now() + self.settings.tap_timeout;
        while !self.stopped() {
            match self.find_reader() {
                Some(reader) => self.watch(&reader, &mut deadline),
                None => {
                    trace!("No PC/SC reader available");
                    thread::sleep(self.settings.poll_interval);
                    self.check_deadline(false, &mut deadline);
                }
            }
        }
        debug!("Reader polling stopped");
    }

    fn find_reader(&self) -> Option<CString> {
        let readers = self.context.list_readers_owned().ok()?;
        match &self.settings.reader {
            Some(wanted) => readers
                .into_iter()
                .find(|name| name.to_string_lossy() == wanted.as_str()),
            None => readers.into_iter().next(),
        }
    }

    /// Follow one reader until it disappears or polling stops
    fn watch(&self, reader: &CStr, deadline: &mut Instant) {
        let name = reader.to_string_lossy().into_owned();
        debug!(reader = %name, "Watching reader");

        let mut states = [ReaderState::new(reader.to_owned(), State::UNAWARE)];
        let mut present = false;
        while !self.stopped() {
            match self
                .context
                .get_status_change(Some(self.settings.poll_interval), &mut states)
            {
                Ok(()) | Err(pcsc::Error::Timeout) => {}
                Err(pcsc::Error::Cancelled) => return,
                Err(e @ (pcsc::Error::UnknownReader | pcsc::Error::ReaderUnavailable)) => {
                    warn!(reader = %name, error = %e, "Reader went away");
                    if present {
                        self.bus.publish(NfcEvent::Disconnected);
                    }
                    return;
                }
                Err(e) => {
                    warn!(reader = %name, error = %e, "Failed to poll reader");
                    thread::sleep(self.settings.poll_interval);
                    continue;
                }
            }

            let state = states[0].event_state();
            states[0].sync_current_state();
            let now_present = state.contains(State::PRESENT) && !state.contains(State::EMPTY);

            if now_present && !present {
                match self.context.connect(reader, ShareMode::Shared, Protocols::ANY) {
                    Ok(card) => {
                        debug!(reader = %name, "Card presented");
                        let channel = KeycardCommandSet::new(PcscCard::new(card, name.clone()));
                        self.bus.publish(NfcEvent::Connected(channel));
                    }
                    Err(e) => warn!(reader = %name, error = %e, "Failed to connect to card"),
                }
            } else if present && !now_present {
                debug!(reader = %name, "Card removed");
                self.bus.publish(NfcEvent::Disconnected);
            }
            present = now_present;
            self.check_deadline(present, deadline);
        }
    }

    fn check_deadline(&self, present: bool, deadline: &mut Instant) {
        let now = Instant::now();
        if present {
            *deadline = now + self.settings.tap_timeout;
        } else if now >= *deadline {
            self.bus.publish(NfcEvent::Timeout);
            *deadline = now + self.settings.tap_timeout;
        }
    }
}
