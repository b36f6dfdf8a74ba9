//! # Meshtastic Envelope Decoding
//!
//! Gateways publish every packet they hear to MQTT wrapped in a
//! `ServiceEnvelope`. This module decodes that wrapper and the inner
//! `MeshPacket`, and splits packets into the encrypted and plaintext cases.
//!
//! ```rust,no_run
//! use meshtraccar::meshtastic::{decode_envelope, PacketPayload};
//!
//! fn inspect(raw: &[u8]) {
//!     match decode_envelope(raw) {
//!         Ok(Some(packet)) => match packet.payload {
//!             PacketPayload::Encrypted(bytes) => println!("{} encrypted bytes", bytes.len()),
//!             PacketPayload::Plaintext(data) => println!("port {}", data.portnum),
//!         },
//!         Ok(None) => println!("envelope without packet"),
//!         Err(e) => println!("dropped: {}", e),
//!     }
//! }
//! ```

pub mod crypto;
pub mod summary;

use bytes::Bytes;
use prost::Message;

use crate::errors::{BridgeError, BridgeResult};
use crate::protobuf::meshtastic_generated as proto;

/// Addressing metadata of a received packet, shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketContext {
    /// `!xxxxxxxx` form of `from`; cache and backend key
    pub device_id: String,
    pub from: u32,
    pub to: u32,
    pub packet_id: u32,
    /// Channel name from the envelope, selects the decryption key
    pub channel_id: String,
    pub gateway_id: String,
    /// Gateway receive time (unix seconds), 0 when not reported
    pub rx_time: u32,
}

impl PacketContext {
    pub fn from_packet(packet: &proto::MeshPacket, channel_id: &str, gateway_id: &str) -> Self {
        Self {
            device_id: device_id(packet.from),
            from: packet.from,
            to: packet.to,
            packet_id: packet.id,
            channel_id: channel_id.to_string(),
            gateway_id: gateway_id.to_string(),
            rx_time: packet.rx_time,
        }
    }

    /// Destination rendered as hex for diagnostics.
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.to)
    }
}

/// Payload variant of a packet; exactly one is populated on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketPayload {
    Encrypted(Bytes),
    Plaintext(proto::Data),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    pub context: PacketContext,
    pub payload: PacketPayload,
}

/// Stable device identifier for a node number: `!` plus eight lowercase hex digits.
pub fn device_id(node_num: u32) -> String {
    format!("!{:08x}", node_num)
}

/// Decode raw MQTT payload bytes.
///
/// Returns `Ok(None)` for a well-formed envelope that carries no packet, or a
/// packet with neither an encrypted nor a decoded payload.
pub fn decode_envelope(raw: &[u8]) -> BridgeResult<Option<ReceivedPacket>> {
    use proto::mesh_packet::PayloadVariant;

    let envelope = proto::ServiceEnvelope::decode(raw)
        .map_err(|e| BridgeError::EnvelopeDecode(e.to_string()))?;

    let Some(packet) = envelope.packet else {
        return Ok(None);
    };

    let context = PacketContext::from_packet(&packet, &envelope.channel_id, &envelope.gateway_id);
    let payload = match packet.payload_variant {
        Some(PayloadVariant::Encrypted(bytes)) => PacketPayload::Encrypted(bytes),
        Some(PayloadVariant::Decoded(data)) => PacketPayload::Plaintext(data),
        None => return Ok(None),
    };

    Ok(Some(ReceivedPacket { context, payload }))
}
