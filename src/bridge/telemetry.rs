//! TELEMETRY_APP: cache device metrics (battery level feeds position reports).

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use prost::Message;
use std::sync::Arc;

use super::dispatch::PortHandler;
use crate::cache::DeviceCache;
use crate::errors::{BridgeError, BridgeResult};
use crate::meshtastic::PacketContext;
use crate::protobuf::meshtastic_generated as proto;

pub struct TelemetryHandler {
    cache: Arc<DeviceCache>,
}

impl TelemetryHandler {
    pub fn new(cache: Arc<DeviceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PortHandler for TelemetryHandler {
    fn port(&self) -> proto::PortNum {
        proto::PortNum::TelemetryApp
    }

    async fn handle(&self, ctx: &PacketContext, payload: &[u8]) -> BridgeResult<()> {
        use proto::telemetry::Variant;

        let telemetry =
            proto::Telemetry::decode(payload).map_err(|source| BridgeError::PayloadDecode {
                port: "TELEMETRY_APP",
                source,
            })?;

        debug!(
            "TELEMETRY_APP id={} from={} to={} time={} data={:?}",
            ctx.packet_id,
            ctx.device_id,
            ctx.to_hex(),
            telemetry.time,
            telemetry.variant
        );

        if let Some(Variant::DeviceMetrics(metrics)) = telemetry.variant {
            self.cache.update(&ctx.device_id, |entry| {
                entry.last_device_metrics = Some(metrics);
                entry.last_update_time = Some(Utc::now());
            });
        }
        Ok(())
    }
}
