//! POSITION_APP: validate the fix, cache it and forward it to the tracking backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use prost::Message;
use std::sync::Arc;

use super::dispatch::PortHandler;
use crate::cache::DeviceCache;
use crate::errors::{BridgeError, BridgeResult};
use crate::meshtastic::PacketContext;
use crate::protobuf::meshtastic_generated as proto;
use crate::traccar::{PositionReport, PositionSync};

pub struct PositionHandler {
    cache: Arc<DeviceCache>,
    sync: Arc<PositionSync>,
}

impl PositionHandler {
    pub fn new(cache: Arc<DeviceCache>, sync: Arc<PositionSync>) -> Self {
        Self { cache, sync }
    }
}

/// Fixed-point (1e-7 degree) coordinate to degrees. Absent fields have no value.
fn degrees(fixed: Option<i32>) -> Option<f64> {
    fixed.map(|v| v as f64 / 1e7).filter(|v| v.is_finite())
}

/// Fix time in ms: the position's own time, else the gateway receive time, else `now`.
fn fix_time_ms(position: &proto::Position, rx_time: u32, now: DateTime<Utc>) -> u64 {
    if position.time != 0 {
        u64::from(position.time) * 1000
    } else if rx_time != 0 {
        u64::from(rx_time) * 1000
    } else {
        now.timestamp_millis().max(0) as u64
    }
}

#[async_trait]
impl PortHandler for PositionHandler {
    fn port(&self) -> proto::PortNum {
        proto::PortNum::PositionApp
    }

    async fn handle(&self, ctx: &PacketContext, payload: &[u8]) -> BridgeResult<()> {
        let position =
            proto::Position::decode(payload).map_err(|source| BridgeError::PayloadDecode {
                port: "POSITION_APP",
                source,
            })?;

        let (Some(latitude), Some(longitude)) =
            (degrees(position.latitude_i), degrees(position.longitude_i))
        else {
            return Err(BridgeError::Validation(format!(
                "position without valid latitude/longitude: {:?}",
                position
            )));
        };

        let now = Utc::now();
        let timestamp_ms = fix_time_ms(&position, ctx.rx_time, now);

        // Cached metrics win over the value embedded in the position, even when stale.
        let (battery, display_name) = self.cache.update(&ctx.device_id, |entry| {
            entry.last_position = Some(position.clone());
            entry.last_update_time = Some(now);
            let battery = entry.cached_battery_level().or(position.battery_level);
            let name = entry
                .long_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Device {}", ctx.device_id));
            (battery, name)
        });

        debug!(
            "POSITION_APP id={} from={} to={} time={} battery={:?} point=[{}, {}, {:?}] data={:?}",
            ctx.packet_id,
            ctx.device_id,
            ctx.to_hex(),
            timestamp_ms,
            battery,
            longitude,
            latitude,
            position.altitude,
            position
        );

        let report = PositionReport {
            id: self.sync.backend_id(&ctx.device_id),
            lat: latitude,
            lon: longitude,
            timestamp_ms,
            altitude: position.altitude,
            speed: position.ground_speed.unwrap_or(0),
            bearing: position.ground_track.unwrap_or(0),
            accuracy: position.gps_accuracy,
            battery,
        };
        self.sync.sync(report, &display_name).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn degrees_scales_fixed_point() {
        assert_eq!(degrees(Some(377749000)), Some(37.7749));
        assert_eq!(degrees(Some(-1224194000)), Some(-122.4194));
        assert_eq!(degrees(None), None);
    }

    #[test]
    fn fix_time_prefers_position_time() {
        let now = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        let mut pos = proto::Position {
            time: 1_700_000_000,
            ..Default::default()
        };
        assert_eq!(fix_time_ms(&pos, 1_700_000_100, now), 1_700_000_000_000);
        pos.time = 0;
        assert_eq!(fix_time_ms(&pos, 1_700_000_100, now), 1_700_000_100_000);
        assert_eq!(fix_time_ms(&pos, 0, now), 1_800_000_000_000);
    }
}
