//! `~/.nxm/airgap.toml` and `NXM_AIRGAP_*` settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::OptionExt;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nexum_airgap::SessionConfig;
use serde::{Deserialize, Serialize};

/// Settings of the air-gapped signer
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// PC/SC reader name, the first reader found when unset
    pub(crate) reader: Option<String>,
    /// JSON file pairings are kept in
    pub(crate) pairing_store: PathBuf,
    /// How long each wait for a reader state change lasts
    pub(crate) poll_interval_ms: u64,
    /// Time without a card before a timeout is reported
    pub(crate) tap_timeout_secs: u64,
    /// Time after which `sign` gives up
    pub(crate) session_timeout_secs: u64,
    #[serde(flatten)]
    pub(crate) session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reader: None,
            pairing_store: nxm_dir().join("pairings.json"),
            poll_interval_ms: 250,
            tap_timeout_secs: 30,
            session_timeout_secs: 120,
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub(crate) const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) const fn tap_timeout(&self) -> Duration {
        Duration::from_secs(self.tap_timeout_secs)
    }

    pub(crate) const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

fn nxm_dir() -> PathBuf {
    std::env::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nxm")
}

/// Default location of the config file
pub(crate) fn config_path() -> eyre::Result<PathBuf> {
    let home = std::env::home_dir().ok_or_eyre("home directory not found")?;
    Ok(home.join(".nxm").join("airgap.toml"))
}

/// Defaults, then the TOML file, then `NXM_AIRGAP_*` variables
pub(crate) fn load_config(path: &Path) -> eyre::Result<Config> {
    Ok(Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NXM_AIRGAP_"))
        .extract()?)
}
