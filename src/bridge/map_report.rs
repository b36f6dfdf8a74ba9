//! MAP_REPORT_APP: keep the latest map report as the device's waypoint.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use prost::Message;
use std::sync::Arc;

use super::dispatch::PortHandler;
use crate::cache::DeviceCache;
use crate::errors::{BridgeError, BridgeResult};
use crate::logutil::escape_log;
use crate::meshtastic::PacketContext;
use crate::protobuf::meshtastic_generated as proto;

pub struct MapReportHandler {
    cache: Arc<DeviceCache>,
}

impl MapReportHandler {
    pub fn new(cache: Arc<DeviceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PortHandler for MapReportHandler {
    fn port(&self) -> proto::PortNum {
        proto::PortNum::MapReportApp
    }

    async fn handle(&self, ctx: &PacketContext, payload: &[u8]) -> BridgeResult<()> {
        let report =
            proto::MapReport::decode(payload).map_err(|source| BridgeError::PayloadDecode {
                port: "MAP_REPORT_APP",
                source,
            })?;

        debug!(
            "MAP_REPORT_APP id={} from={} to={} long_name={:?} fw={} lat_i={} lon_i={} online={}",
            ctx.packet_id,
            ctx.device_id,
            ctx.to_hex(),
            escape_log(&report.long_name),
            escape_log(&report.firmware_version),
            report.latitude_i,
            report.longitude_i,
            report.num_online_local_nodes
        );

        self.cache.update(&ctx.device_id, |entry| {
            entry.last_waypoint = Some(report);
            entry.last_update_time = Some(Utc::now());
        });
        Ok(())
    }
}
