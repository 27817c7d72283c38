use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::model::tag::{is_data_block, CryptoKey, ID_BLOCK, NAME_BLOCK};
use crate::session::Settings;

pub const ENV_PREFIX: &str = "CARDWRITER_";

#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_spi_device")]
    pub spi_device: String,
    #[serde(default = "default_spi_speed_hz")]
    pub spi_speed_hz: u32,
    /// Key A as 12 hex digits.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_name_block")]
    pub name_block: u8,
    #[serde(default = "default_id_block")]
    pub id_block: u8,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub debug: bool,
}

fn default_spi_device() -> String {
    "/dev/spidev0.0".to_string()
}

fn default_spi_speed_hz() -> u32 {
    1_000_000
}

fn default_name_block() -> u8 {
    NAME_BLOCK
}

fn default_id_block() -> u8 {
    ID_BLOCK
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Config {
            spi_device: default_spi_device(),
            spi_speed_hz: default_spi_speed_hz(),
            key: None,
            name_block: default_name_block(),
            id_block: default_id_block(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            debug: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config: Config = envy::prefixed(ENV_PREFIX)
            .from_env()
            .context("Loading configuration from environment")?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("Loading configuration")?;
        Ok(config)
    }

    pub fn key(&self) -> Result<CryptoKey> {
        match self.key {
            Some(ref hex) => CryptoKey::from_hex(hex).context("Parsing CARDWRITER_KEY"),
            None => Ok(CryptoKey::default()),
        }
    }

    /// Loop settings. Fails for block addresses that must not receive text.
    pub fn settings(&self) -> Result<Settings> {
        for (var, block) in &[
            ("CARDWRITER_NAME_BLOCK", self.name_block),
            ("CARDWRITER_ID_BLOCK", self.id_block),
        ] {
            if !is_data_block(*block) {
                bail!(
                    "{}={} is not a data block (block 0 and sector trailers are reserved)",
                    var,
                    block
                );
            }
        }
        if self.name_block == self.id_block {
            bail!(
                "Name and id must use different blocks, both are {}",
                self.name_block
            );
        }
        Ok(Settings {
            name_block: self.name_block,
            id_block: self.id_block,
            debounce: self.debounce(),
            poll_interval: self.poll_interval(),
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("spi_device", &self.spi_device)
            .field("spi_speed_hz", &self.spi_speed_hz)
            .field("key", &self.key.as_ref().map(|_| ".."))
            .field("name_block", &self.name_block)
            .field("id_block", &self.id_block)
            .field("debounce_ms", &self.debounce_ms)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_to_empty_environment() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(config.spi_device, "/dev/spidev0.0");
        assert_eq!(config.name_block, 4);
        assert_eq!(config.id_block, 8);
        assert_eq!(config.debounce(), Duration::from_secs(2));
        assert_eq!(config.key().unwrap(), CryptoKey::default());
        assert!(!config.debug);
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = Config::from_vars(vars(&[
            ("CARDWRITER_SPI_DEVICE", "/dev/spidev1.0"),
            ("CARDWRITER_KEY", "a0a1a2a3a4a5"),
            ("CARDWRITER_DEBOUNCE_MS", "500"),
            ("CARDWRITER_DEBUG", "true"),
            ("SPI_DEVICE", "/dev/ignored"),
        ]))
        .unwrap();
        assert_eq!(config.spi_device, "/dev/spidev1.0");
        assert_eq!(
            config.key().unwrap(),
            CryptoKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5])
        );
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.debug);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_vars(vars(&[("CARDWRITER_NAME_BLOCK", "four")])).is_err());
        let config = Config::from_vars(vars(&[("CARDWRITER_KEY", "ffff")])).unwrap();
        assert!(config.key().is_err());
    }

    #[test]
    fn default_blocks_are_accepted() {
        let settings = Config::default().settings().unwrap();
        assert_eq!(settings.name_block, 4);
        assert_eq!(settings.id_block, 8);
        assert_eq!(settings.debounce, Duration::from_secs(2));
    }

    #[test]
    fn reserved_blocks_are_rejected() {
        for (var, value) in &[
            ("CARDWRITER_NAME_BLOCK", "0"),
            ("CARDWRITER_NAME_BLOCK", "7"),
            ("CARDWRITER_ID_BLOCK", "3"),
            ("CARDWRITER_ID_BLOCK", "11"),
            ("CARDWRITER_ID_BLOCK", "255"),
        ] {
            let config = Config::from_vars(vars(&[(*var, *value)])).unwrap();
            assert!(config.settings().is_err(), "accepted {}={}", var, value);
        }
    }

    #[test]
    fn other_data_blocks_are_accepted() {
        let config = Config::from_vars(vars(&[
            ("CARDWRITER_NAME_BLOCK", "1"),
            ("CARDWRITER_ID_BLOCK", "62"),
        ]))
        .unwrap();
        let settings = config.settings().unwrap();
        assert_eq!((settings.name_block, settings.id_block), (1, 62));
    }

    #[test]
    fn equal_blocks_are_rejected() {
        let config = Config::from_vars(vars(&[("CARDWRITER_ID_BLOCK", "4")])).unwrap();
        assert!(config.settings().is_err());
    }

    #[test]
    fn key_is_redacted_in_debug_output() {
        let config = Config::from_vars(vars(&[("CARDWRITER_KEY", "a0a1a2a3a4a5")])).unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("a0a1"));
        assert!(printed.contains("key: Some(\"..\")"));
    }
}
