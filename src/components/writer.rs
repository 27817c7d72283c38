use thiserror::Error;
use tracing::{debug, warn};

use crate::components::rfid::CardReader;
use crate::model::tag::{encode_block, CryptoKey, Uid};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    #[error("Auth failed for block {0}")]
    AuthFailed(u8),
    #[error("Write failed for block {0}")]
    WriteFailed(u8),
}

/// One physically present tag, from detection until it is halted.
pub struct CardSession<'r, R: CardReader> {
    reader: &'r mut R,
    key: &'r CryptoKey,
    uid: Uid,
}

impl<'r, R: CardReader> CardSession<'r, R> {
    /// Returns `None` if no new tag is present or its serial cannot be read.
    pub fn open(reader: &'r mut R, key: &'r CryptoKey) -> Option<Self> {
        match reader.is_new_tag_present() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                warn!("Failed to poll for PICC: {:#}", err);
                return None;
            }
        }
        let uid = match reader.read_tag_serial() {
            Ok(uid) => uid,
            Err(err) => {
                debug!("Failed to read PICC serial: {:#}", err);
                return None;
            }
        };
        Some(CardSession { reader, key, uid })
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Authenticates `block` and writes `data` into it as a single zero-padded block.
    pub fn write(&mut self, block: u8, data: &str) -> Result<(), WriteError> {
        let buffer = encode_block(data);
        if let Err(err) = self.reader.authenticate(block, self.key, &self.uid) {
            warn!("PICC {}: {:#}", self.uid, err);
            return Err(WriteError::AuthFailed(block));
        }
        if let Err(err) = self.reader.write_block(block, &buffer) {
            warn!("PICC {}: {:#}", self.uid, err);
            return Err(WriteError::WriteFailed(block));
        }
        debug!("PICC {}: wrote block {}", self.uid, block);
        Ok(())
    }

    /// Halts the tag and ends the Crypto1 session.
    pub fn close(self) {
        if let Err(err) = self.reader.halt_tag() {
            warn!("Could not halt PICC {}: {:#}", self.uid, err);
        }
        if let Err(err) = self.reader.stop_crypto() {
            warn!("Could not stop crypto1 for PICC {}: {:#}", self.uid, err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::components::rfid::testing::{Call, MockReader, Presence};

    const UID: [u8; 4] = [0x22, 0xf6, 0xb2, 0xab];

    #[test]
    fn no_session_without_tag() {
        let mut reader = MockReader::new();
        let key = CryptoKey::default();
        assert!(CardSession::open(&mut reader, &key).is_none());
        assert_eq!(reader.calls, vec![Call::IsNewTagPresent]);
    }

    #[test]
    fn no_session_with_unreadable_serial() {
        let mut reader = MockReader::new();
        reader.present(Presence::Unreadable);
        let key = CryptoKey::default();
        assert!(CardSession::open(&mut reader, &key).is_none());
        assert_eq!(
            reader.calls,
            vec![Call::IsNewTagPresent, Call::ReadTagSerial]
        );
    }

    #[test]
    fn writes_zero_padded_block() {
        let mut reader = MockReader::new();
        reader.present_tag(&UID);
        let key = CryptoKey::default();
        let mut session = CardSession::open(&mut reader, &key).unwrap();
        assert_eq!(session.uid().to_string(), "22f6b2ab");
        session.write(4, "Dr. Smith").unwrap();
        session.close();

        let mut expected = [0u8; 16];
        expected[..9].copy_from_slice(b"Dr. Smith");
        assert_eq!(reader.blocks[&4], expected);
        assert_eq!(reader.keys_used, vec![CryptoKey::default()]);
        assert!(reader.calls.ends_with(&[Call::HaltTag, Call::StopCrypto]));
    }

    #[test]
    fn failed_auth_skips_write() {
        let mut reader = MockReader::new();
        reader.present_tag(&UID);
        reader.auth_failures.insert(4);
        reader.blocks.insert(4, *b"previous content");
        let key = CryptoKey::default();
        let mut session = CardSession::open(&mut reader, &key).unwrap();
        assert_eq!(session.write(4, "Dr. Smith"), Err(WriteError::AuthFailed(4)));
        session.close();

        assert!(reader.writes().is_empty());
        assert_eq!(&reader.blocks[&4], b"previous content");
    }

    #[test]
    fn failed_write_is_reported() {
        let mut reader = MockReader::new();
        reader.present_tag(&UID);
        reader.write_failures.insert(8);
        let key = CryptoKey::default();
        let mut session = CardSession::open(&mut reader, &key).unwrap();
        assert_eq!(session.write(4, "name"), Ok(()));
        assert_eq!(session.write(8, "id"), Err(WriteError::WriteFailed(8)));
        session.close();

        // No rollback of the first block.
        assert!(reader.blocks.contains_key(&4));
        assert!(!reader.blocks.contains_key(&8));
    }

    #[test]
    fn uses_configured_key() {
        let mut reader = MockReader::new();
        reader.present_tag(&UID);
        let key = CryptoKey::new([1, 2, 3, 4, 5, 6]);
        let mut session = CardSession::open(&mut reader, &key).unwrap();
        session.write(4, "x").unwrap();
        session.close();
        assert_eq!(reader.keys_used, vec![key]);
    }
}
