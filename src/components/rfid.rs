use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, trace};

use hal::spidev::{SpiModeFlags, SpidevOptions};
use hal::SpidevDevice;
use linux_embedded_hal as hal;
use mfrc522::comm::blocking::spi::{DummyDelay, SpiInterface};
use mfrc522::{self, AtqA, Initialized, Mfrc522};

use crate::config::Config;
use crate::model::tag::{CryptoKey, Uid, BLOCK_SIZE};

/// Card reader operations needed for writing a tag.
pub trait CardReader {
    /// Non-blocking check for a tag that newly entered the field.
    fn is_new_tag_present(&mut self) -> Result<bool>;
    /// Selects the tag found by the last presence check and returns its serial number.
    fn read_tag_serial(&mut self) -> Result<Uid>;
    /// Authenticates `block` with `key` as Key A.
    fn authenticate(&mut self, block: u8, key: &CryptoKey, uid: &Uid) -> Result<()>;
    fn write_block(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<()>;
    fn halt_tag(&mut self) -> Result<()>;
    fn stop_crypto(&mut self) -> Result<()>;
}

type Device = Mfrc522<SpiInterface<SpidevDevice, DummyDelay>, Initialized>;

pub struct RfidController {
    mfrc522: Device,
    atqa: Option<AtqA>,
    selected: Option<(Uid, mfrc522::Uid)>,
}

// mfrc522::error::Error only has a stub Display implementation.
fn driver_error<E: std::fmt::Debug>(err: E) -> anyhow::Error {
    anyhow!("{:?}", err)
}

impl RfidController {
    pub fn new(config: &Config) -> Result<Self> {
        let mut spi = SpidevDevice::open(&config.spi_device)
            .with_context(|| format!("Opening SPI device {}", config.spi_device))?;
        let options = SpidevOptions::new()
            .max_speed_hz(config.spi_speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options).context("Configuring SPI device")?;

        let itf = SpiInterface::new(spi);
        let mut mfrc522 = Mfrc522::new(itf)
            .init()
            .map_err(driver_error)
            .context("Initializing MFRC522 PCD")?;

        let vers = mfrc522
            .version()
            .map_err(driver_error)
            .context("Retrieving MFRC522 version information")?;

        info!("mfrc522 version: 0x{:x}", vers);
        info!("Created new MFRC522 Controller");
        Ok(RfidController {
            mfrc522,
            atqa: None,
            selected: None,
        })
    }
}

impl CardReader for RfidController {
    fn is_new_tag_present(&mut self) -> Result<bool> {
        match self.mfrc522.reqa() {
            Ok(atqa) => {
                trace!("reqa() returned AtqA");
                self.atqa = Some(atqa);
                Ok(true)
            }
            Err(mfrc522::error::Error::Timeout) => Ok(false),
            Err(err) => {
                // Collisions and garbled frames look like an empty field to the caller.
                trace!("reqa(): {:?}", err);
                Ok(false)
            }
        }
    }

    fn read_tag_serial(&mut self) -> Result<Uid> {
        let atqa = match self.atqa.take() {
            Some(atqa) => atqa,
            None => bail!("No PICC answered REQA"),
        };
        let uid = self
            .mfrc522
            .select(&atqa)
            .map_err(|err| {
                trace!("select(): {:?}", err);
                driver_error(err)
            })
            .context("Selecting AtqA for PICC")?;
        let pretty_uid = Uid::from_bytes(uid.as_bytes());
        debug!("Selected PICC {}", pretty_uid);
        self.selected = Some((pretty_uid.clone(), uid));
        Ok(pretty_uid)
    }

    fn authenticate(&mut self, block: u8, key: &CryptoKey, uid: &Uid) -> Result<()> {
        let raw_uid = match self.selected {
            Some((ref selected, ref raw_uid)) if selected == uid => raw_uid,
            _ => bail!("PICC {} is not selected", uid),
        };
        self.mfrc522
            .mf_authenticate(raw_uid, block, key.as_bytes())
            .map_err(driver_error)
            .with_context(|| format!("Authenticating block {}", block))
    }

    fn write_block(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.mfrc522
            .mf_write(block, *data)
            .map_err(driver_error)
            .with_context(|| format!("Writing block {}", block))
    }

    fn halt_tag(&mut self) -> Result<()> {
        self.selected = None;
        self.mfrc522
            .hlta()
            .map_err(driver_error)
            .context("Halting PICC")
    }

    fn stop_crypto(&mut self) -> Result<()> {
        self.mfrc522
            .stop_crypto1()
            .map_err(driver_error)
            .context("Stopping Crypto1")
    }
}

pub mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};

    /// Driver calls recorded by `MockReader`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        IsNewTagPresent,
        ReadTagSerial,
        Authenticate(u8),
        WriteBlock(u8),
        HaltTag,
        StopCrypto,
    }

    /// What the next presence check sees.
    #[derive(Debug, Clone)]
    pub enum Presence {
        Absent,
        Unreadable,
        Tag(Uid),
    }

    /// In-memory reader with scripted tags and failures.
    #[derive(Default)]
    pub struct MockReader {
        pub presence: VecDeque<Presence>,
        pub auth_failures: HashSet<u8>,
        pub write_failures: HashSet<u8>,
        pub blocks: HashMap<u8, [u8; BLOCK_SIZE]>,
        pub calls: Vec<Call>,
        pub keys_used: Vec<CryptoKey>,
        current: Option<Presence>,
        authenticated: HashSet<u8>,
    }

    impl MockReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn present(&mut self, presence: Presence) {
            self.presence.push_back(presence);
        }

        pub fn present_tag(&mut self, uid: &[u8]) {
            self.present(Presence::Tag(Uid::from_bytes(uid)));
        }

        pub fn writes(&self) -> Vec<u8> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::WriteBlock(block) => Some(*block),
                    _ => None,
                })
                .collect()
        }
    }

    impl CardReader for MockReader {
        fn is_new_tag_present(&mut self) -> Result<bool> {
            self.calls.push(Call::IsNewTagPresent);
            let presence = self.presence.pop_front().unwrap_or(Presence::Absent);
            let present = !matches!(presence, Presence::Absent);
            self.current = Some(presence);
            Ok(present)
        }

        fn read_tag_serial(&mut self) -> Result<Uid> {
            self.calls.push(Call::ReadTagSerial);
            match self.current.take() {
                Some(Presence::Tag(uid)) => {
                    self.current = Some(Presence::Tag(uid.clone()));
                    Ok(uid)
                }
                _ => bail!("PICC did not answer SELECT"),
            }
        }

        fn authenticate(&mut self, block: u8, key: &CryptoKey, uid: &Uid) -> Result<()> {
            self.calls.push(Call::Authenticate(block));
            self.keys_used.push(*key);
            match self.current {
                Some(Presence::Tag(ref current)) if current == uid => {}
                _ => bail!("PICC {} is not selected", uid),
            }
            if self.auth_failures.contains(&block) {
                bail!("Timeout");
            }
            self.authenticated.insert(block);
            Ok(())
        }

        fn write_block(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<()> {
            self.calls.push(Call::WriteBlock(block));
            if !self.authenticated.contains(&block) {
                bail!("Block {} not authenticated", block);
            }
            if self.write_failures.contains(&block) {
                bail!("Nak");
            }
            self.blocks.insert(block, *data);
            Ok(())
        }

        fn halt_tag(&mut self) -> Result<()> {
            self.calls.push(Call::HaltTag);
            self.current = None;
            Ok(())
        }

        fn stop_crypto(&mut self) -> Result<()> {
            self.calls.push(Call::StopCrypto);
            self.authenticated.clear();
            Ok(())
        }
    }
}
