//! Channel key handling and AES-CTR payload decryption.
//!
//! Meshtastic encrypts the serialized `Data` message of every channel packet with
//! AES-CTR. The initial counter block is the packet id (u64 LE), the sender node
//! number (u32 LE) and four zero bytes. CTR is symmetric, so [`ChannelKey::apply`]
//! both encrypts and decrypts.

use aes::{Aes128, Aes256};
use base64::Engine as _;
use ctr::cipher::{KeyIvInit, StreamCipher};
use log::trace;
use prost::Message;
use std::collections::HashMap;

use super::PacketContext;
use crate::errors::{BridgeError, BridgeResult};
use crate::protobuf::meshtastic_generated as proto;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// The well-known key behind the one-byte PSK `AQ==` ("1PG7OiApB1nwvP+rz05pAQ==").
pub const DEFAULT_PSK: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69, 0x01,
];

/// A decoded channel pre-shared key.
#[derive(Clone, PartialEq, Eq)]
pub enum ChannelKey {
    /// Channel without encryption; payload bytes are already plaintext.
    Plain,
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        match self {
            ChannelKey::Plain => write!(f, "ChannelKey::Plain"),
            ChannelKey::Aes128(_) => write!(f, "ChannelKey::Aes128(..)"),
            ChannelKey::Aes256(_) => write!(f, "ChannelKey::Aes256(..)"),
        }
    }
}

impl ChannelKey {
    /// Expand raw PSK bytes using the Meshtastic shorthand rules.
    ///
    /// - empty or `[0]`: no encryption
    /// - `[n]` with `1 <= n <= 10`: default key with its last byte bumped by `n - 1`
    /// - 16 bytes: AES-128, 32 bytes: AES-256
    pub fn from_psk(psk: &[u8]) -> Result<Self, String> {
        match psk.len() {
            0 => Ok(ChannelKey::Plain),
            1 => match psk[0] {
                0 => Ok(ChannelKey::Plain),
                n @ 1..=10 => {
                    let mut key = DEFAULT_PSK;
                    key[15] = key[15].wrapping_add(n - 1);
                    Ok(ChannelKey::Aes128(key))
                }
                n => Err(format!("unsupported default key index {}", n)),
            },
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(psk);
                Ok(ChannelKey::Aes128(key))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(psk);
                Ok(ChannelKey::Aes256(key))
            }
            n => Err(format!("key must be 0, 1, 16 or 32 bytes, got {}", n)),
        }
    }

    /// Decode a base64 PSK as shown in the Meshtastic apps.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64: {}", e))?;
        Self::from_psk(&raw)
    }

    /// Apply the AES-CTR keystream for packet `packet_id` sent by `from`.
    pub fn apply(&self, packet_id: u32, from: u32, data: &[u8]) -> BridgeResult<Vec<u8>> {
        let nonce = packet_nonce(packet_id, from);
        let mut buf = data.to_vec();
        match self {
            ChannelKey::Plain => {}
            ChannelKey::Aes128(key) => {
                let mut cipher = Aes128Ctr::new_from_slices(key, &nonce)
                    .map_err(|e| BridgeError::Decrypt(e.to_string()))?;
                cipher.apply_keystream(&mut buf);
            }
            ChannelKey::Aes256(key) => {
                let mut cipher = Aes256Ctr::new_from_slices(key, &nonce)
                    .map_err(|e| BridgeError::Decrypt(e.to_string()))?;
                cipher.apply_keystream(&mut buf);
            }
        }
        Ok(buf)
    }
}

fn packet_nonce(packet_id: u32, from: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[0..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
    nonce[8..12].copy_from_slice(&from.to_le_bytes());
    nonce
}

/// Key ring used to decrypt packets, selected by the envelope's channel id.
#[derive(Debug, Clone)]
pub struct Decryptor {
    default_key: ChannelKey,
    by_channel: HashMap<String, ChannelKey>,
}

impl Decryptor {
    pub fn new(default_key: ChannelKey) -> Self {
        Self {
            default_key,
            by_channel: HashMap::new(),
        }
    }

    /// Build from the `[channel]` config section.
    pub fn from_config(config: &crate::config::ChannelConfig) -> anyhow::Result<Self> {
        let default_key = ChannelKey::from_base64(&config.default_key)
            .map_err(|e| anyhow::anyhow!("channel.default_key: {}", e))?;
        let mut decryptor = Self::new(default_key);
        for (name, encoded) in &config.keys {
            let key = ChannelKey::from_base64(encoded)
                .map_err(|e| anyhow::anyhow!("channel.keys.{}: {}", name, e))?;
            decryptor = decryptor.with_channel_key(name.clone(), key);
        }
        Ok(decryptor)
    }

    pub fn with_channel_key(mut self, channel_id: impl Into<String>, key: ChannelKey) -> Self {
        self.by_channel.insert(channel_id.into(), key);
        self
    }

    pub fn key_for(&self, channel_id: &str) -> &ChannelKey {
        self.by_channel.get(channel_id).unwrap_or(&self.default_key)
    }

    /// Decrypt `ciphertext` and parse it as a `Data` message.
    ///
    /// A parse failure after decryption is reported as [`BridgeError::Decrypt`]: with
    /// a stream cipher a wrong key only shows up as unparsable plaintext.
    pub fn decrypt(&self, ctx: &PacketContext, ciphertext: &[u8]) -> BridgeResult<proto::Data> {
        let key = self.key_for(&ctx.channel_id);
        let plaintext = key.apply(ctx.packet_id, ctx.from, ciphertext)?;
        trace!(
            "decrypted packet id={} from={} channel={:?} ({} bytes)",
            ctx.packet_id,
            ctx.device_id,
            ctx.channel_id,
            plaintext.len()
        );
        proto::Data::decode(plaintext.as_slice()).map_err(|e| {
            BridgeError::Decrypt(format!(
                "wrong key or corrupted payload for packet {}: {}",
                ctx.packet_id, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shorthand_expands_to_well_known_key() {
        assert_eq!(
            ChannelKey::from_base64("AQ==").unwrap(),
            ChannelKey::Aes128(DEFAULT_PSK)
        );
        assert_eq!(
            ChannelKey::from_base64("1PG7OiApB1nwvP+rz05pAQ==").unwrap(),
            ChannelKey::Aes128(DEFAULT_PSK)
        );
    }

    #[test]
    fn shorthand_index_bumps_last_byte() {
        match ChannelKey::from_psk(&[3]).unwrap() {
            ChannelKey::Aes128(key) => {
                assert_eq!(key[..15], DEFAULT_PSK[..15]);
                assert_eq!(key[15], DEFAULT_PSK[15] + 2);
            }
            other => panic!("unexpected key {:?}", other),
        }
    }

    #[test]
    fn zero_or_empty_psk_means_plaintext() {
        assert_eq!(ChannelKey::from_psk(&[]).unwrap(), ChannelKey::Plain);
        assert_eq!(ChannelKey::from_psk(&[0]).unwrap(), ChannelKey::Plain);
        let data = b"hello".to_vec();
        assert_eq!(ChannelKey::Plain.apply(1, 2, &data).unwrap(), data);
    }

    #[test]
    fn rejects_odd_key_lengths() {
        assert!(ChannelKey::from_psk(&[1, 2, 3]).is_err());
        assert!(ChannelKey::from_psk(&[11]).is_err());
        assert!(ChannelKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn nonce_layout() {
        let nonce = packet_nonce(0x0102_0304, 0xa1b2_c3d4);
        assert_eq!(
            nonce,
            [4, 3, 2, 1, 0, 0, 0, 0, 0xd4, 0xc3, 0xb2, 0xa1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn keystream_is_symmetric_and_nonce_dependent() {
        let key = ChannelKey::Aes256([7u8; 32]);
        let plain = b"position payload".to_vec();
        let sealed = key.apply(42, 0xdead_beef, &plain).unwrap();
        assert_ne!(sealed, plain);
        assert_eq!(key.apply(42, 0xdead_beef, &sealed).unwrap(), plain);
        assert_ne!(key.apply(43, 0xdead_beef, &sealed).unwrap(), plain);
    }

    #[test]
    fn channel_specific_key_wins_over_default() {
        let private = ChannelKey::Aes128([9u8; 16]);
        let decryptor = Decryptor::new(ChannelKey::Aes128(DEFAULT_PSK))
            .with_channel_key("Private", private.clone());
        assert_eq!(decryptor.key_for("Private"), &private);
        assert_eq!(
            decryptor.key_for("LongFast"),
            &ChannelKey::Aes128(DEFAULT_PSK)
        );
    }
}
