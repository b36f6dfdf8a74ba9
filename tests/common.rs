//! Test utilities & fixtures.
//! Provides a recording tracking backend and builders for encrypted uplink envelopes.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;

use meshtraccar::bridge::MessageIngress;
use meshtraccar::cache::DeviceCache;
use meshtraccar::errors::{BridgeError, BridgeResult};
use meshtraccar::meshtastic::crypto::{ChannelKey, Decryptor, DEFAULT_PSK};
use meshtraccar::protobuf::meshtastic_generated as proto;
use meshtraccar::traccar::{PositionReport, TrackingBackend};

/// One call observed by [`FakeBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Lookup(String),
    Create { unique_id: String, name: String },
    Submit(PositionReport),
}

/// In-memory stand-in for Traccar. Devices created through it are remembered,
/// so a second position for the same device skips creation.
pub struct FakeBackend {
    pub calls: Mutex<Vec<BackendCall>>,
    known: Mutex<Vec<String>>,
    pub fail_lookup: bool,
    pub refuse_create: bool,
    pub fail_create: bool,
    pub fail_submit: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            known: Mutex::new(Vec::new()),
            fail_lookup: false,
            refuse_create: false,
            fail_create: false,
            fail_submit: false,
        }
    }

    pub fn with_device(self, unique_id: &str) -> Self {
        self.known.lock().unwrap().push(unique_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<PositionReport> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Submit(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn creations(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Create { unique_id, name } => Some((unique_id, name)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TrackingBackend for FakeBackend {
    async fn device_exists(&self, unique_id: &str) -> BridgeResult<bool> {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::Lookup(unique_id.to_string()));
        if self.fail_lookup {
            return Err(BridgeError::backend("device lookup", "connection refused"));
        }
        Ok(self.known.lock().unwrap().iter().any(|d| d == unique_id))
    }

    async fn create_device(&self, unique_id: &str, name: &str) -> BridgeResult<bool> {
        self.calls.lock().unwrap().push(BackendCall::Create {
            unique_id: unique_id.to_string(),
            name: name.to_string(),
        });
        if self.refuse_create {
            return Ok(false);
        }
        if self.fail_create {
            return Err(BridgeError::backend(
                "device creation",
                "400 Bad Request: Duplicate entry",
            ));
        }
        self.known.lock().unwrap().push(unique_id.to_string());
        Ok(true)
    }

    async fn submit_position(&self, report: &PositionReport) -> BridgeResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::Submit(report.clone()));
        if self.fail_submit {
            return Err(BridgeError::backend("position submission", "503 Service Unavailable"));
        }
        Ok(String::new())
    }
}

pub const CHANNEL: &str = "LongFast";

/// Ingress with the default key, a fresh cache and `backend`.
pub fn ingress_with(backend: Arc<FakeBackend>) -> (MessageIngress, Arc<DeviceCache>) {
    let cache = Arc::new(DeviceCache::new());
    let ingress = MessageIngress::with_handlers(
        Decryptor::new(ChannelKey::Aes128(DEFAULT_PSK)),
        cache.clone(),
        backend,
        "",
    );
    (ingress, cache)
}

/// Envelope whose packet carries `data` encrypted with `key`.
pub fn encrypted_envelope(key: &ChannelKey, from: u32, packet_id: u32, data: &proto::Data) -> Vec<u8> {
    let ciphertext = key
        .apply(packet_id, from, &data.encode_to_vec())
        .expect("encrypt");
    let packet = proto::MeshPacket {
        from,
        to: 0xffff_ffff,
        id: packet_id,
        payload_variant: Some(proto::mesh_packet::PayloadVariant::Encrypted(Bytes::from(
            ciphertext,
        ))),
        ..Default::default()
    };
    proto::ServiceEnvelope {
        packet: Some(packet),
        channel_id: CHANNEL.to_string(),
        gateway_id: "!deadbeef".to_string(),
    }
    .encode_to_vec()
}

/// Envelope encrypted with the default channel key.
pub fn envelope(from: u32, packet_id: u32, port: proto::PortNum, payload: Vec<u8>) -> Vec<u8> {
    let data = proto::Data {
        portnum: port as i32,
        payload: Bytes::from(payload),
        ..Default::default()
    };
    encrypted_envelope(&ChannelKey::Aes128(DEFAULT_PSK), from, packet_id, &data)
}

pub fn position(lat_i: i32, lon_i: i32, altitude: Option<i32>) -> proto::Position {
    proto::Position {
        latitude_i: Some(lat_i),
        longitude_i: Some(lon_i),
        altitude,
        time: 1_700_000_000,
        ..Default::default()
    }
}

pub fn position_envelope(from: u32, packet_id: u32, pos: &proto::Position) -> Vec<u8> {
    envelope(from, packet_id, proto::PortNum::PositionApp, pos.encode_to_vec())
}

pub fn node_info_envelope(from: u32, packet_id: u32, long_name: &str) -> Vec<u8> {
    let user = proto::User {
        id: format!("!{:08x}", from),
        long_name: long_name.to_string(),
        short_name: "TST".to_string(),
        ..Default::default()
    };
    envelope(from, packet_id, proto::PortNum::NodeinfoApp, user.encode_to_vec())
}

pub fn battery_envelope(from: u32, packet_id: u32, level: u32) -> Vec<u8> {
    let telemetry = proto::Telemetry {
        time: 1_700_000_000,
        variant: Some(proto::telemetry::Variant::DeviceMetrics(proto::DeviceMetrics {
            battery_level: Some(level),
            ..Default::default()
        })),
    };
    envelope(from, packet_id, proto::PortNum::TelemetryApp, telemetry.encode_to_vec())
}
