//! Subcommand implementations

use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};

use eyre::{OptionExt, WrapErr, bail};
use nexum_airgap::request::ETH_SIGN_REQUEST_UR_TYPE;
use nexum_airgap::{
    CardSession, ExecuteOptions, FilePairingStore, PairingStore, Phase, ScanOutcome, SignRequest,
    UrScanner, signing_operation,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::display::{info, key_value_box, success, warning};
use crate::reader::{PcscNfc, PollSettings};

/// Frames from the command line, or one per stdin line when none are given
fn read_frames(frames: Vec<String>) -> eyre::Result<Vec<String>> {
    if !frames.is_empty() {
        return Ok(frames);
    }
    io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("failed to read frames from stdin")
}

/// Reassemble and decode an `eth-sign-request`
fn scan(frames: Vec<String>) -> eyre::Result<SignRequest> {
    let mut scanner = UrScanner::new();
    for frame in read_frames(frames)? {
        match scanner.receive(&frame) {
            ScanOutcome::Progress => eprintln!(
                "{}",
                info(&format!(
                    "Scanned {} frame(s), {:.0}%",
                    scanner.received_frames(),
                    scanner.progress() * 100.0
                ))
            ),
            ScanOutcome::Complete => break,
            ScanOutcome::Duplicate => debug!("Duplicate frame"),
            ScanOutcome::Ignored => eprintln!("{}", warning("Ignoring input that is not a UR")),
            ScanOutcome::Rejected(reason) => eprintln!("{}", warning(&reason)),
        }
    }

    if let Some(error) = scanner.error() {
        bail!("failed to decode scanned frames: {error}");
    }
    let payload = scanner
        .payload_of(ETH_SIGN_REQUEST_UR_TYPE)
        .ok_or_eyre("not enough frames to reassemble the request")??;
    Ok(SignRequest::decode(payload)?)
}

pub(crate) fn decode_command(frames: Vec<String>) -> eyre::Result<()> {
    let request = scan(frames)?;
    println!("{request}");
    match request.signing_hash() {
        Ok(hash) => println!("  Signing hash: {hash}"),
        Err(e) => println!("{}", warning(&e.to_string())),
    }
    Ok(())
}

fn prompt_pin(prompt: &str) -> eyre::Result<Zeroizing<String>> {
    eprint!("{prompt}: ");
    io::stderr().flush()?;
    let mut input = Zeroizing::new(String::new());
    io::stdin().read_line(&mut input)?;
    Ok(Zeroizing::new(input.trim().to_owned()))
}

pub(crate) fn sign_command(
    config: &Config,
    frames: Vec<String>,
    pin: Option<String>,
) -> eyre::Result<()> {
    let request = scan(frames)?;
    eprintln!("{request}");

    let pin = match pin {
        Some(pin) => Zeroizing::new(pin),
        None => prompt_pin(&config.session.pin_prompt)?,
    };

    let nfc = PcscNfc::new(PollSettings {
        reader: config.reader.clone(),
        poll_interval: config.poll_interval(),
        tap_timeout: config.tap_timeout(),
    })
    .wrap_err("failed to establish PC/SC context")?;
    let store = FilePairingStore::new(&config.pairing_store);
    let mut session = CardSession::new(nfc, store, config.session.clone());

    session.execute(signing_operation(request), ExecuteOptions::with_pin())?;
    session.submit_pin(pin.as_str())?;
    drop(pin);

    let deadline = Instant::now() + config.session_timeout();
    let mut last_status = String::new();
    loop {
        let phase = session.wait_settled(Duration::from_millis(250));
        if session.status() != last_status {
            last_status = session.status().to_owned();
            eprintln!("{}", info(&last_status));
        }

        match phase {
            Phase::Done => break,
            Phase::Error => bail!("{}", session.error().unwrap_or("signing failed")),
            Phase::Idle => bail!("signing cancelled"),
            Phase::PinEntry | Phase::Nfc if Instant::now() >= deadline => {
                session.cancel();
                bail!(
                    "no card presented within {}s",
                    config.session_timeout().as_secs()
                );
            }
            Phase::PinEntry | Phase::Nfc => {}
        }
    }

    let response = session
        .take_result()
        .ok_or_eyre("session finished without a result")?;
    eprintln!("{}", success("Signed, show this code to the wallet"));
    println!("{response}");
    Ok(())
}

pub(crate) fn readers_command(config: &Config) -> eyre::Result<()> {
    let nfc = PcscNfc::new(PollSettings {
        reader: config.reader.clone(),
        poll_interval: config.poll_interval(),
        tap_timeout: config.tap_timeout(),
    })?;

    let readers = match nfc.readers() {
        Ok(readers) => readers,
        Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    if readers.is_empty() {
        println!("{}", warning("No PC/SC readers found"));
        return Ok(());
    }

    println!(
        "{}",
        key_value_box(
            "Readers",
            readers.iter().enumerate().map(|(i, name)| {
                let selected = config.reader.as_deref() == Some(name.as_str())
                    || (config.reader.is_none() && i == 0);
                ("reader", format!("{name}{}", if selected { " (selected)" } else { "" }))
            }),
        )
    );
    Ok(())
}

pub(crate) fn list_pairings_command(config: &Config) -> eyre::Result<()> {
    let store = FilePairingStore::new(&config.pairing_store);
    let entries = store.entries()?;
    if entries.is_empty() {
        println!("{}", info("No stored pairings"));
        return Ok(());
    }

    let namespace = &config.session.pairing_namespace;
    println!(
        "{}",
        key_value_box(
            &format!("Pairings in {}", store.path().display()),
            entries.iter().map(|(key, slot)| {
                (
                    key.strip_prefix(namespace.as_str()).unwrap_or(key),
                    format!("slot {slot}"),
                )
            }),
        )
    );
    Ok(())
}

pub(crate) fn forget_pairing_command(config: &Config, instance_uid: &str) -> eyre::Result<()> {
    let store = FilePairingStore::new(&config.pairing_store);
    let key = if instance_uid.starts_with(&config.session.pairing_namespace) {
        instance_uid.to_owned()
    } else {
        config.session.pairing_key(&instance_uid.to_ascii_lowercase())
    };

    if store.load(&key)?.is_none() {
        bail!("no pairing stored for {instance_uid}");
    }
    store.delete(&key)?;
    println!("{}", success(&format!("Forgot pairing for {instance_uid}")));
    Ok(())
}
