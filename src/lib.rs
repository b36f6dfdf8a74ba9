//! # Meshtraccar - Meshtastic to Traccar Telemetry Bridge
//!
//! Meshtraccar listens to the MQTT feed that Meshtastic gateways publish, decrypts
//! the mesh packets with the channel pre-shared keys, and forwards GPS fixes to a
//! Traccar server, registering unknown devices on the fly.
//!
//! ## Features
//!
//! - **Envelope Decoding**: `ServiceEnvelope` / `MeshPacket` protobuf decoding with prost.
//! - **Channel Decryption**: AES-CTR with the Meshtastic nonce layout and PSK shorthands.
//! - **Port Dispatch**: Position, node info, telemetry and map report handlers.
//! - **Device Cache**: Per-device last known state; battery and names enrich positions.
//! - **Traccar Sync**: Device provisioning through the management API, positions over OsmAnd.
//! - **Async Design**: Built with Tokio; devices are processed concurrently, each one in order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshtraccar::bridge::MessageIngress;
//! use meshtraccar::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (ingress, _cache) = MessageIngress::from_config(&config)?;
//!     meshtraccar::mqtt::run_subscriber(&config.mqtt, Arc::new(ingress)).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - Message ingress, port dispatch and the per-port handlers
//! - [`meshtastic`] - Envelope decoding, channel decryption and payload summaries
//! - [`cache`] - In-memory device state
//! - [`traccar`] - Tracking backend client and position sync
//! - [`mqtt`] - Broker subscription loop
//! - [`config`] - Configuration management and validation
//! - [`protobuf`] - Generated Meshtastic protocol buffer types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   MQTT Broker   │ ← Gateway uplink
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ MessageIngress  │ ← Decode, decrypt, dispatch
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  DeviceCache /  │ ← State and forwarding
//! │  PositionSync   │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │     Traccar     │
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod errors;
pub mod logutil;
pub mod meshtastic;
pub mod mqtt;
pub mod protobuf;
pub mod traccar;
