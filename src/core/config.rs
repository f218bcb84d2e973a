use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::protocol::{
    error::ModbusResult,
    procimg::{ProcessImage, SlaveStore, UnitRegistry},
};

pub const DEFAULT_CONFIG_FILE: &str = "asciibus.toml";

pub const SEARCH_REGISTER_ENV: &str = "ASCIIBUS_SEARCH_REGISTER";
pub const SEARCH_TIMEOUT_ENV: &str = "ASCIIBUS_SEARCH_TIMEOUT_MS";

pub const DEFAULT_SEARCH_REGISTER: u16 = 10;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5000;

/// Discovery tunables resolved once at startup from the environment, the
/// configuration file and compiled defaults, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub search_register: u16,
    pub search_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_register: DEFAULT_SEARCH_REGISTER,
            search_timeout: Duration::from_millis(DEFAULT_SEARCH_TIMEOUT_MS),
        }
    }
}

impl DiscoveryConfig {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let file = read_table(path.as_ref());
        let section = file
            .as_ref()
            .and_then(|table| table.get("discovery"))
            .and_then(toml::Value::as_table);
        Self::resolve(section, |key| std::env::var(key).ok())
    }

    /// Resolves each tunable from `env` first, then the `[discovery]` table.
    /// Malformed values at either level are logged and skipped.
    pub fn resolve(section: Option<&toml::Table>, env: impl Fn(&str) -> Option<String>) -> Self {
        let search_register = pick(
            SEARCH_REGISTER_ENV,
            env(SEARCH_REGISTER_ENV),
            section.and_then(|table| table.get("search_register")),
            register_value,
        )
        .unwrap_or(DEFAULT_SEARCH_REGISTER);
        let search_timeout = pick(
            SEARCH_TIMEOUT_ENV,
            env(SEARCH_TIMEOUT_ENV),
            section.and_then(|table| table.get("search_timeout_ms")),
            timeout_value,
        )
        .unwrap_or(Duration::from_millis(DEFAULT_SEARCH_TIMEOUT_MS));
        Self {
            search_register,
            search_timeout,
        }
    }
}

/// Per-construction overrides; out of range values are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOverrides {
    pub search_register: Option<i64>,
    pub search_timeout_ms: Option<i64>,
}

impl ProbeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_register(mut self, register: i64) -> Self {
        self.search_register = Some(register);
        self
    }

    pub fn with_search_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.search_timeout_ms = Some(timeout_ms);
        self
    }
}

/// The register and timeout a discovery run probes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub register: u16,
    pub timeout: Duration,
}

impl ProbeSettings {
    pub fn resolve(config: &DiscoveryConfig, overrides: &ProbeOverrides) -> Self {
        let register = overrides
            .search_register
            .and_then(|raw| accept_override("search register", raw, register_value))
            .unwrap_or(config.search_register);
        let timeout = overrides
            .search_timeout_ms
            .and_then(|raw| accept_override("search timeout", raw, timeout_value))
            .unwrap_or(config.search_timeout);
        Self { register, timeout }
    }
}

impl From<&DiscoveryConfig> for ProbeSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self::resolve(config, &ProbeOverrides::default())
    }
}

fn register_value(raw: i64) -> Option<u16> {
    u16::try_from(raw).ok()
}

fn timeout_value(raw: i64) -> Option<Duration> {
    (1..=i64::from(u32::MAX))
        .contains(&raw)
        .then(|| Duration::from_millis(raw as u64))
}

fn accept_override<T>(name: &str, raw: i64, accept: fn(i64) -> Option<T>) -> Option<T> {
    let value = accept(raw);
    if value.is_none() {
        log::warn!("Ignoring out of range {name} override {raw}");
    }
    value
}

fn pick<T>(
    env_key: &str,
    env_value: Option<String>,
    file_value: Option<&toml::Value>,
    accept: fn(i64) -> Option<T>,
) -> Option<T> {
    if let Some(raw) = env_value {
        match raw.trim().parse::<i64>().ok().and_then(accept) {
            Some(value) => return Some(value),
            None => log::error!("Malformed value {raw:?} in {env_key}, ignoring it"),
        }
    }
    if let Some(raw) = file_value {
        match raw.as_integer().and_then(accept) {
            Some(value) => return Some(value),
            None => log::error!("Malformed configuration value {raw} for {env_key}, ignoring it"),
        }
    }
    None
}

fn read_table(path: &Path) -> Option<toml::Table> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            log::warn!("Configuration file {} not loaded: {err}", path.display());
            return None;
        }
    };
    match toml::from_str::<toml::Table>(&content) {
        Ok(table) => Some(table),
        Err(err) => {
            log::error!("Configuration file {} is not valid TOML: {err}", path.display());
            None
        }
    }
}

/// Initial process image for one slave unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitImageConfig {
    pub unit_id: u8,
    #[serde(flatten)]
    pub image: ProcessImage,
}

/// The `[slave]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Read timeout on served connections; bounds how long a serving
    /// thread blocks before rechecking whether it should stop.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub units: Vec<UnitImageConfig>,
}

fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            echo: false,
            units: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlaveFile {
    #[serde(default)]
    slave: SlaveConfig,
}

impl SlaveConfig {
    /// Loads the `[slave]` section; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|err| anyhow!("Failed to read {}: {err}", path.display()))?;
        Self::parse(&content).map_err(|err| anyhow!("Invalid slave section in {}: {err}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str::<SlaveFile>(content)?.slave)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// Builds the served store; `fallback_unit` gets an empty image when no
    /// units are configured.
    pub fn build_store(&self, fallback_unit: u8) -> ModbusResult<SlaveStore> {
        match self.units.as_slice() {
            [] => Ok(SlaveStore::single(fallback_unit, ProcessImage::new())),
            [unit] => Ok(SlaveStore::single(unit.unit_id, unit.image.clone())),
            units => Ok(SlaveStore::multiple(UnitRegistry::with_images(
                units.iter().map(|unit| (unit.unit_id, unit.image.clone())),
            )?)),
        }
    }
}
