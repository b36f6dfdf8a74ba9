//! # Bridge Pipeline
//!
//! [`MessageIngress`] is invoked once per broker message and runs
//! envelope decode → decrypt → port dispatch → handler. Every failure is
//! logged and ends processing of that message only.
//!
//! ```text
//! raw bytes ─► decode_envelope ─┬─ encrypted ─► Decryptor ─► PortDispatcher ─► handler ─► DeviceCache
//!                               │                                                 └─► PositionSync ─► Traccar
//!                               └─ plaintext ─► ignored
//! ```
//!
//! Work for one sender is serialized by [`DeviceLocks`]; different senders are
//! processed concurrently.

pub mod dispatch;
pub mod locks;
pub mod map_report;
pub mod node_info;
pub mod position;
pub mod telemetry;

use log::{debug, log_enabled, trace, warn, Level};
use std::sync::Arc;

use crate::cache::DeviceCache;
use crate::config::Config;
use crate::logutil::hex_snippet;
use crate::meshtastic::crypto::Decryptor;
use crate::meshtastic::summary::{port_label, summarize_port_payload};
use crate::meshtastic::{decode_envelope, PacketPayload};
use crate::protobuf::meshtastic_generated as proto;
use crate::traccar::{PositionSync, TraccarClient, TrackingBackend};

pub use dispatch::{DispatchOutcome, PortDispatcher, PortHandler};
pub use locks::DeviceLocks;
pub use map_report::MapReportHandler;
pub use node_info::NodeInfoHandler;
pub use position::PositionHandler;
pub use telemetry::TelemetryHandler;

/// How one inbound message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Bytes are not a `ServiceEnvelope`
    Malformed,
    /// Envelope carried no packet, or a packet without payload
    NoPacket,
    /// Plaintext packets are accepted but not processed
    PlaintextIgnored,
    /// Wrong key or corrupted ciphertext
    DecryptFailed,
    Dispatched(DispatchOutcome),
}

pub struct MessageIngress {
    decryptor: Decryptor,
    dispatcher: PortDispatcher,
    locks: DeviceLocks,
}

impl MessageIngress {
    pub fn new(decryptor: Decryptor, dispatcher: PortDispatcher) -> Self {
        Self {
            decryptor,
            dispatcher,
            locks: DeviceLocks::new(),
        }
    }

    /// Wire the standard handler set around a shared cache and tracking backend.
    pub fn with_handlers(
        decryptor: Decryptor,
        cache: Arc<DeviceCache>,
        backend: Arc<dyn TrackingBackend>,
        id_prefix: &str,
    ) -> Self {
        let sync = Arc::new(PositionSync::new(backend, id_prefix));
        let dispatcher = PortDispatcher::new()
            .with_handler(Arc::new(MapReportHandler::new(cache.clone())))
            .with_handler(Arc::new(NodeInfoHandler::new(cache.clone())))
            .with_handler(Arc::new(TelemetryHandler::new(cache.clone())))
            .with_handler(Arc::new(PositionHandler::new(cache, sync)));
        Self::new(decryptor, dispatcher)
    }

    /// Composition root for the binary: real Traccar client, cache sized from config.
    pub fn from_config(config: &Config) -> anyhow::Result<(Self, Arc<DeviceCache>)> {
        let decryptor = Decryptor::from_config(&config.channel)?;
        let cache = Arc::new(DeviceCache::from_config(&config.cache));
        let backend: Arc<dyn TrackingBackend> =
            Arc::new(TraccarClient::new(config.traccar.clone())?);
        let ingress = Self::with_handlers(decryptor, cache.clone(), backend, &config.traccar.id_prefix);
        Ok((ingress, cache))
    }

    /// Process one broker message. Never fails; the outcome is for callers and tests.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> IngressOutcome {
        let packet = match decode_envelope(payload) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                debug!("Envelope on {} carried no packet payload", topic);
                return IngressOutcome::NoPacket;
            }
            Err(e) => {
                warn!(
                    "Failed to parse ServiceEnvelope on {}: {} (bytes={})",
                    topic,
                    e,
                    hex_snippet(payload, 16)
                );
                return IngressOutcome::Malformed;
            }
        };

        let ctx = packet.context;
        let ciphertext = match packet.payload {
            PacketPayload::Encrypted(bytes) => bytes,
            PacketPayload::Plaintext(data) => {
                // Plaintext handling is undecided; accept and drop.
                debug!(
                    "Ignoring plaintext packet {} from {} on port {}",
                    ctx.packet_id, ctx.device_id, data.portnum
                );
                return IngressOutcome::PlaintextIgnored;
            }
        };

        let _device = self.locks.acquire(&ctx.device_id).await;

        let data = match self.decryptor.decrypt(&ctx, &ciphertext) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to decrypt packet on {}: {}", topic, e);
                return IngressOutcome::DecryptFailed;
            }
        };

        if log_enabled!(Level::Trace) {
            let summary = proto::PortNum::try_from(data.portnum)
                .ok()
                .and_then(|port| summarize_port_payload(port, &data.payload));
            trace!(
                "{} {} from {}: {}",
                port_label(data.portnum),
                ctx.packet_id,
                ctx.device_id,
                summary.as_deref().unwrap_or("-")
            );
        }

        IngressOutcome::Dispatched(self.dispatcher.dispatch(&ctx, &data).await)
    }
}
