//! Persisted pairings, keyed by the card's namespaced instance UID.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::hex;
use nexum_keycard::PairingInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Key/value contract for pairing persistence
pub trait PairingStore {
    /// Pairing stored under `key`
    fn load(&self, key: &str) -> Result<Option<PairingInfo>>;

    /// Store `pairing` under `key`, replacing any previous one
    fn save(&self, key: &str, pairing: &PairingInfo) -> Result<()>;

    /// Forget `key`. Missing keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

impl<S: PairingStore + ?Sized> PairingStore for std::sync::Arc<S> {
    fn load(&self, key: &str) -> Result<Option<PairingInfo>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, pairing: &PairingInfo) -> Result<()> {
        (**self).save(key, pairing)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryPairingStore {
    pairings: Mutex<HashMap<String, PairingInfo>>,
}

impl MemoryPairingStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pairings
    pub fn len(&self) -> usize {
        self.pairings.lock().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.pairings.lock().is_empty()
    }
}

impl PairingStore for MemoryPairingStore {
    fn load(&self, key: &str) -> Result<Option<PairingInfo>> {
        Ok(self.pairings.lock().get(key).cloned())
    }

    fn save(&self, key: &str, pairing: &PairingInfo) -> Result<()> {
        self.pairings.lock().insert(key.to_owned(), pairing.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.pairings.lock().remove(key);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredPairing {
    index: u8,
    key: String,
}

impl StoredPairing {
    fn to_pairing(&self) -> Result<PairingInfo> {
        let key = Zeroizing::new(
            hex::decode(&self.key).map_err(|e| Error::Store(format!("invalid pairing key: {e}")))?,
        );
        let key: [u8; 32] = key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Store("pairing key must be 32 bytes".to_owned()))?;
        Ok(PairingInfo::new(key, self.index))
    }
}

/// JSON file of pairings, rewritten on every change
#[derive(Debug)]
pub struct FilePairingStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePairingStore {
    /// Store backed by the JSON file at `path`, created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored keys with their pairing slot
    pub fn entries(&self) -> Result<Vec<(String, u8)>> {
        let _guard = self.lock.lock();
        Ok(self
            .read()?
            .into_iter()
            .map(|(key, stored)| (key, stored.index))
            .collect())
    }

    fn read(&self) -> Result<BTreeMap<String, StoredPairing>> {
        match fs::read(&self.path) {
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, pairings: &BTreeMap<String, StoredPairing>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(pairings)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = pairings.len(), "Wrote pairing store");
        Ok(())
    }
}

impl PairingStore for FilePairingStore {
    fn load(&self, key: &str) -> Result<Option<PairingInfo>> {
        let _guard = self.lock.lock();
        self.read()?
            .get(key)
            .map(StoredPairing::to_pairing)
            .transpose()
    }

    fn save(&self, key: &str, pairing: &PairingInfo) -> Result<()> {
        let _guard = self.lock.lock();
        let mut pairings = self.read()?;
        pairings.insert(
            key.to_owned(),
            StoredPairing {
                index: pairing.index,
                key: hex::encode(pairing.key.as_slice()),
            },
        );
        self.write(&pairings)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut pairings = self.read()?;
        if pairings.remove(key).is_some() {
            self.write(&pairings)?;
        }
        Ok(())
    }
}
