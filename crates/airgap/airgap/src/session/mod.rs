//! Card session state machine.
//!
//! One session drives one hardware-present operation:
//!
//! ```text
//! Idle -> PinEntry -> Nfc -> Done
//!             \        \
//!              +------> Error
//! ```
//!
//! `cancel`/`reset` return to `Idle` from any phase. Hardware events are
//! handled one at a time, each to completion, on the caller's thread.

mod events;
pub use events::*;

mod store;
pub use store::*;

use std::fmt;
use std::time::{Duration, Instant};

use derive_more::Display;
use nexum_keycard::{CommandChannel, DEFAULT_PAIRING_PASSWORD, PairingInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Phase {
    /// No operation armed
    #[display("idle")]
    Idle,
    /// Armed, waiting for the PIN
    #[display("waiting for PIN")]
    PinEntry,
    /// Listening for a card
    #[display("waiting for card")]
    Nfc,
    /// The operation produced a result
    #[display("done")]
    Done,
    /// The operation failed
    #[display("failed")]
    Error,
}

/// Session settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pairing password used when a card is seen for the first time
    pub pairing_password: String,
    /// Prefix of pairing store keys, followed by the hex instance UID
    pub pairing_namespace: String,
    /// Shown while waiting for a tap
    pub listen_prompt: String,
    /// Shown while waiting for the PIN
    pub pin_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pairing_password: DEFAULT_PAIRING_PASSWORD.to_owned(),
            pairing_namespace: "keycard-pairing-".to_owned(),
            listen_prompt: "Hold your Keycard against the reader".to_owned(),
            pin_prompt: "Enter your Keycard PIN".to_owned(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("pairing_namespace", &self.pairing_namespace)
            .field("listen_prompt", &self.listen_prompt)
            .field("pin_prompt", &self.pin_prompt)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Store key for a card's hex instance UID
    pub fn pairing_key(&self, instance_uid: &str) -> String {
        format!("{}{}", self.pairing_namespace, instance_uid)
    }
}

/// Options for [`CardSession::execute`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Collect and verify the PIN before running the operation
    pub requires_pin: bool,
}

impl ExecuteOptions {
    /// Require the PIN
    pub const fn with_pin() -> Self {
        Self { requires_pin: true }
    }
}

/// Work run against the authenticated channel, producing the displayable result
pub type Operation<C> = Box<dyn FnOnce(&mut C) -> Result<String>>;

/// State machine for one hardware-present operation
pub struct CardSession<N: NfcController> {
    controller: N,
    store: Box<dyn PairingStore>,
    config: SessionConfig,
    subscription: Option<Subscription<N::Channel>>,
    phase: Phase,
    status: String,
    pin: Option<Zeroizing<String>>,
    channel: Option<N::Channel>,
    operation: Option<Operation<N::Channel>>,
    result: Option<String>,
    error: Option<String>,
}

impl<N: NfcController> fmt::Debug for CardSession<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardSession")
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("connected", &self.channel.is_some())
            .field("armed", &self.operation.is_some())
            .finish_non_exhaustive()
    }
}

impl<N> CardSession<N>
where
    N: NfcController,
    N::Channel: CommandChannel,
{
    /// Idle session over a controller and pairing store
    pub fn new(controller: N, store: impl PairingStore + 'static, config: SessionConfig) -> Self {
        Self {
            controller,
            store: Box::new(store),
            config,
            subscription: None,
            phase: Phase::Idle,
            status: String::new(),
            pin: None,
            channel: None,
            operation: None,
            result: None,
            error: None,
        }
    }

    /// Current phase
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Human readable status for the operator
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Result of the last successful operation
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Take the result, leaving none behind
    pub const fn take_result(&mut self) -> Option<String> {
        self.result.take()
    }

    /// Message of the failure that ended the last operation
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The NFC controller
    pub const fn controller(&self) -> &N {
        &self.controller
    }

    /// Arm the session with `operation`.
    ///
    /// With a PIN the session waits in [`Phase::PinEntry`], otherwise it starts
    /// listening for a card straight away.
    pub fn execute<F>(&mut self, operation: F, options: ExecuteOptions) -> Result<()>
    where
        F: FnOnce(&mut N::Channel) -> Result<String> + 'static,
    {
        if matches!(self.phase, Phase::PinEntry | Phase::Nfc) {
            return Err(Error::InvalidPhase(self.phase));
        }

        self.operation = Some(Box::new(operation));
        self.pin = None;
        self.result = None;
        self.error = None;
        if self.subscription.is_none() {
            self.subscription = Some(self.controller.subscribe());
        }

        if options.requires_pin {
            let prompt = self.config.pin_prompt.clone();
            self.transition(Phase::PinEntry, prompt);
        } else {
            self.begin_listening();
        }
        Ok(())
    }

    /// Buffer the PIN and start listening for a card
    pub fn submit_pin(&mut self, pin: impl Into<String>) -> Result<()> {
        let pin = Zeroizing::new(pin.into());
        if self.phase != Phase::PinEntry {
            return Err(Error::InvalidPhase(self.phase));
        }

        self.pin = Some(pin);
        self.begin_listening();
        Ok(())
    }

    /// Stop listening and drop the armed operation and PIN
    pub fn cancel(&mut self) {
        self.controller.stop_listening();
        self.disarm();
        self.transition(Phase::Idle, "Cancelled".to_owned());
    }

    /// Cancel and forget the previous result, ready for a new operation
    pub fn reset(&mut self) {
        self.cancel();
        self.result = None;
        self.error = None;
        self.status.clear();
    }

    /// Handle one hardware event
    pub fn handle_event(&mut self, event: NfcEvent<N::Channel>) {
        debug!(event = event.kind(), phase = %self.phase, "NFC event");
        match event {
            NfcEvent::Connected(channel) => self.on_connected(channel),
            NfcEvent::Disconnected => {
                self.channel = None;
                if self.phase == Phase::Nfc {
                    self.status = "Card removed, tap again".to_owned();
                }
            }
            NfcEvent::UserCancelled => {
                if self.phase == Phase::Nfc {
                    self.disarm();
                    self.transition(Phase::Idle, "Cancelled".to_owned());
                }
            }
            NfcEvent::Timeout => {
                if self.phase == Phase::Nfc {
                    self.status = "No card detected, tap again".to_owned();
                }
            }
        }
    }

    /// Handle every pending event, returning how many were handled
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.subscription.as_ref().and_then(Subscription::try_recv) {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Handle events until the session leaves [`Phase::PinEntry`]/[`Phase::Nfc`]
    /// or `timeout` elapses. Returns the phase reached.
    pub fn wait_settled(&mut self, timeout: Duration) -> Phase {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if !matches!(self.phase, Phase::PinEntry | Phase::Nfc) {
                return self.phase;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.phase;
            }
            let Some(event) = self
                .subscription
                .as_ref()
                .and_then(|subscription| subscription.recv_timeout(remaining))
            else {
                continue;
            };
            self.handle_event(event);
        }
    }

    fn begin_listening(&mut self) {
        let prompt = self.config.listen_prompt.clone();
        self.transition(Phase::Nfc, prompt.clone());
        self.controller.start_listening(&prompt);
    }

    fn on_connected(&mut self, channel: N::Channel) {
        if self.phase != Phase::Nfc {
            debug!(phase = %self.phase, "Ignoring card outside of the NFC phase");
            return;
        }
        let Some(operation) = self.operation.take() else {
            debug!("Ignoring card, operation already started");
            return;
        };

        self.status = "Card connected, keep it in place".to_owned();
        let pin = self.pin.take();
        let channel = self.channel.insert(channel);
        let outcome = establish(channel, self.store.as_ref(), &self.config, pin)
            .and_then(|()| operation(channel));

        self.channel = None;
        self.subscription = None;
        self.controller.stop_listening();

        match outcome {
            Ok(result) => {
                info!("Card operation completed");
                self.result = Some(result);
                self.transition(Phase::Done, "Done".to_owned());
            }
            Err(e) => {
                warn!(error = %e, "Card operation failed");
                let message = e.to_string();
                self.error = Some(message.clone());
                self.transition(Phase::Error, message);
            }
        }
    }

    fn disarm(&mut self) {
        self.pin = None;
        self.operation = None;
        self.channel = None;
        self.subscription = None;
    }

    fn transition(&mut self, phase: Phase, status: String) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Session phase change");
        }
        self.phase = phase;
        self.status = status;
    }
}

impl<N: NfcController> Drop for CardSession<N> {
    fn drop(&mut self) {
        if self.phase == Phase::Nfc {
            self.controller.stop_listening();
        }
    }
}

/// Select, pair or reuse a pairing, open the secure channel and verify the PIN.
///
/// A stored pairing the card refuses is replaced once. The PIN is never retried.
fn establish<C: CommandChannel>(
    channel: &mut C,
    store: &dyn PairingStore,
    config: &SessionConfig,
    pin: Option<Zeroizing<String>>,
) -> Result<()> {
    let info = channel.select()?;
    let instance_uid = info.instance_uid_hex();
    let key = config.pairing_key(&instance_uid);

    let stored = store.load(&key).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load pairing, treating card as new");
        None
    });

    match stored {
        Some(pairing) => match channel.open_secure_channel(&pairing) {
            Ok(()) => debug!(%instance_uid, "Reused stored pairing"),
            Err(e) if e.is_pairing_rejected() => {
                warn!(%instance_uid, error = %e, "Card rejected stored pairing, pairing again");
                if let Err(e) = store.delete(&key) {
                    warn!(error = %e, "Failed to delete stale pairing");
                }
                let pairing = pair(channel, store, config, &key)?;
                channel.open_secure_channel(&pairing)?;
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            let pairing = pair(channel, store, config, &key)?;
            channel.open_secure_channel(&pairing)?;
        }
    }

    if let Some(pin) = pin {
        let verified = channel.verify_pin(&pin);
        drop(pin);
        verified?;
    }
    Ok(())
}

fn pair<C: CommandChannel>(
    channel: &mut C,
    store: &dyn PairingStore,
    config: &SessionConfig,
    key: &str,
) -> Result<PairingInfo> {
    let pairing = channel.pair(&config.pairing_password)?;
    info!(slot = pairing.index, "Paired with card");
    if let Err(e) = store.save(key, &pairing) {
        warn!(error = %e, "Failed to persist pairing");
    }
    Ok(pairing)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use bytes::Bytes;
    use coins_bip32::path::DerivationPath;
    use nexum_keycard::{ApplicationInfo, status};

    use super::*;

    /// Card that refuses to be selected
    struct MissingApplet;

    impl CommandChannel for MissingApplet {
        fn select(&mut self) -> nexum_keycard::Result<ApplicationInfo> {
            Err(nexum_keycard::Error::Status {
                command: "SELECT",
                sw: status::SW_FILE_NOT_FOUND,
            })
        }

        fn pair(&mut self, _password: &str) -> nexum_keycard::Result<PairingInfo> {
            unreachable!()
        }

        fn open_secure_channel(&mut self, _pairing: &PairingInfo) -> nexum_keycard::Result<()> {
            unreachable!()
        }

        fn verify_pin(&mut self, _pin: &str) -> nexum_keycard::Result<()> {
            unreachable!()
        }

        fn sign(
            &mut self,
            _hash: &[u8; 32],
            _path: &DerivationPath,
        ) -> nexum_keycard::Result<Bytes> {
            unreachable!()
        }
    }

    #[derive(Clone, Default)]
    struct TestNfc {
        bus: EventBus<MissingApplet>,
        listening: Arc<AtomicBool>,
    }

    impl NfcController for TestNfc {
        type Channel = MissingApplet;

        fn start_listening(&self, _prompt: &str) {
            self.listening.store(true, Ordering::SeqCst);
        }

        fn stop_listening(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }

        fn subscribe(&self) -> Subscription<MissingApplet> {
            self.bus.subscribe()
        }
    }

    fn session() -> (CardSession<TestNfc>, TestNfc) {
        let nfc = TestNfc::default();
        let session = CardSession::new(
            nfc.clone(),
            MemoryPairingStore::new(),
            SessionConfig::default(),
        );
        (session, nfc)
    }

    fn noop(_: &mut MissingApplet) -> Result<String> {
        Ok(String::new())
    }

    #[test]
    fn execute_without_pin_listens_immediately() {
        let (mut session, nfc) = session();
        session.execute(noop, ExecuteOptions::default()).unwrap();

        assert_eq!(session.phase(), Phase::Nfc);
        assert_eq!(session.status(), SessionConfig::default().listen_prompt);
        assert!(nfc.listening.load(Ordering::SeqCst));
        assert_eq!(nfc.bus.subscriber_count(), 1);

        assert!(matches!(
            session.execute(noop, ExecuteOptions::default()),
            Err(Error::InvalidPhase(Phase::Nfc))
        ));
    }

    #[test]
    fn pin_entry_precedes_listening() {
        let (mut session, nfc) = session();
        assert!(matches!(
            session.submit_pin("123456"),
            Err(Error::InvalidPhase(Phase::Idle))
        ));

        session.execute(noop, ExecuteOptions::with_pin()).unwrap();
        assert_eq!(session.phase(), Phase::PinEntry);
        assert!(!nfc.listening.load(Ordering::SeqCst));

        session.submit_pin("123456").unwrap();
        assert_eq!(session.phase(), Phase::Nfc);
        assert!(nfc.listening.load(Ordering::SeqCst));
    }

    #[test]
    fn disconnect_only_touches_status_while_listening() {
        let (mut session, _nfc) = session();
        session.handle_event(NfcEvent::Disconnected);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.status(), "");

        session.execute(noop, ExecuteOptions::default()).unwrap();
        session.handle_event(NfcEvent::Disconnected);
        assert_eq!(session.phase(), Phase::Nfc);
        assert_eq!(session.status(), "Card removed, tap again");
    }

    #[test]
    fn timeout_keeps_phase() {
        let (mut session, _nfc) = session();
        session.execute(noop, ExecuteOptions::default()).unwrap();
        session.handle_event(NfcEvent::Timeout);
        assert_eq!(session.phase(), Phase::Nfc);
        assert_eq!(session.status(), "No card detected, tap again");
    }

    #[test]
    fn user_cancel_only_applies_while_listening() {
        let (mut session, nfc) = session();
        session.execute(noop, ExecuteOptions::with_pin()).unwrap();
        session.handle_event(NfcEvent::UserCancelled);
        assert_eq!(session.phase(), Phase::PinEntry);

        session.submit_pin("000000").unwrap();
        session.handle_event(NfcEvent::UserCancelled);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(nfc.bus.subscriber_count(), 0);
    }

    #[test]
    fn card_errors_end_in_error_phase() {
        let (mut session, nfc) = session();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        session
            .execute(
                move |_: &mut MissingApplet| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(String::new())
                },
                ExecuteOptions::default(),
            )
            .unwrap();

        assert!(nfc.bus.publish(NfcEvent::Connected(MissingApplet)));
        assert_eq!(session.pump(), 1);

        assert_eq!(session.phase(), Phase::Error);
        assert_eq!(
            session.status(),
            "SELECT failed: card returned status 6A82"
        );
        assert_eq!(session.error(), Some(session.status()));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!nfc.listening.load(Ordering::SeqCst));

        // A later tap does not restart anything
        session.handle_event(NfcEvent::Connected(MissingApplet));
        session.handle_event(NfcEvent::Disconnected);
        assert_eq!(session.phase(), Phase::Error);
        assert_eq!(
            session.status(),
            "SELECT failed: card returned status 6A82"
        );
    }

    #[test]
    fn cancel_and_reset() {
        let (mut session, nfc) = session();
        session.execute(noop, ExecuteOptions::with_pin()).unwrap();
        session.submit_pin("123456").unwrap();

        session.cancel();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!nfc.listening.load(Ordering::SeqCst));
        assert_eq!(nfc.bus.subscriber_count(), 0);

        // Nothing armed: a tap is ignored
        session.handle_event(NfcEvent::Connected(MissingApplet));
        assert_eq!(session.phase(), Phase::Idle);

        session.execute(noop, ExecuteOptions::default()).unwrap();
        session.reset();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.status(), "");
        assert_eq!(session.result(), None);
    }

    #[test]
    fn wait_settled_times_out_while_listening() {
        let (mut session, nfc) = session();
        session.execute(noop, ExecuteOptions::default()).unwrap();
        nfc.bus.publish(NfcEvent::Timeout);

        let phase = session.wait_settled(Duration::from_millis(20));
        assert_eq!(phase, Phase::Nfc);
        assert_eq!(session.status(), "No card detected, tap again");
    }
}
