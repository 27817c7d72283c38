use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Size of a single MIFARE Classic data block in bytes.
pub const BLOCK_SIZE: usize = 16;
/// Block holding the name field.
pub const NAME_BLOCK: u8 = 4;
/// Block holding the id field.
pub const ID_BLOCK: u8 = 8;

const KEY_SIZE: usize = 6;
const BLOCKS_PER_SECTOR: u8 = 4;

/// Whether `block` may hold application data. Block 0 holds manufacturer data and
/// the last block of every sector holds the keys and access bits.
pub fn is_data_block(block: u8) -> bool {
    block != 0 && block % BLOCKS_PER_SECTOR != BLOCKS_PER_SECTOR - 1
}

/// Key A used for authenticating data blocks.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CryptoKey([u8; KEY_SIZE]);

impl Default for CryptoKey {
    /// Factory default key of MIFARE Classic tags.
    fn default() -> Self {
        CryptoKey([0xFF; KEY_SIZE])
    }
}

impl CryptoKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        CryptoKey(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).with_context(|| format!("Decoding key '{}'", s))?;
        if bytes.len() != KEY_SIZE {
            bail!(
                "Key must be {} bytes long, got {} bytes",
                KEY_SIZE,
                bytes.len()
            );
        }
        let mut key = [0; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(CryptoKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Keys stay out of the logs.
impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CryptoKey(..)")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Uid(String);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Uid {
    pub fn from_bytes(bs: &[u8]) -> Uid {
        Uid(hex::encode(bs))
    }
}

/// Encodes `data` into a zero-padded block. Text beyond `BLOCK_SIZE` bytes is cut off.
pub fn encode_block(data: &str) -> [u8; BLOCK_SIZE] {
    let mut buffer = [0u8; BLOCK_SIZE];
    let bytes = data.as_bytes();
    let n = bytes.len().min(BLOCK_SIZE);
    if bytes.len() > BLOCK_SIZE {
        warn!(
            "Truncating '{}' from {} to {} bytes",
            data,
            bytes.len(),
            BLOCK_SIZE
        );
    }
    buffer[..n].copy_from_slice(&bytes[..n]);
    buffer
}
