//! One-line human readable summaries of the port payloads the bridge understands.

use prost::Message;

use crate::logutil::escape_log;
use crate::protobuf::meshtastic_generated as proto;

fn fmt_percent(val: f32) -> String {
    if val.is_finite() {
        if val <= 1.0 {
            format!("{:.0}%", val * 100.0)
        } else {
            format!("{:.0}%", val)
        }
    } else {
        "na".to_string()
    }
}

/// Port name as used in diagnostics (`POSITION_APP`), or the raw number.
pub fn port_label(portnum: i32) -> String {
    match proto::PortNum::try_from(portnum) {
        Ok(port) => port.as_str_name().to_string(),
        Err(_) => format!("PORT_{}", portnum),
    }
}

/// Summarize a payload for `port`. `None` when the port is not one we render or
/// the payload does not parse.
pub fn summarize_port_payload(port: proto::PortNum, payload: &[u8]) -> Option<String> {
    match port {
        proto::PortNum::PositionApp => {
            let pos = proto::Position::decode(payload).ok()?;
            let mut parts = Vec::new();
            if let (Some(la), Some(lo)) = (pos.latitude_i, pos.longitude_i) {
                parts.push(format!(
                    "lat={:.5} lon={:.5}",
                    la as f64 / 1e7,
                    lo as f64 / 1e7
                ));
            }
            if let Some(a) = pos.altitude.or(pos.altitude_hae) {
                parts.push(format!("alt={}m", a));
            }
            if let Some(speed) = pos.ground_speed {
                parts.push(format!("speed={}m/s", speed));
            }
            if let Some(batt) = pos.battery_level {
                parts.push(format!("batt={}%", batt));
            }
            if parts.is_empty() {
                Some("position (no fix)".to_string())
            } else {
                Some(format!("position {}", parts.join(" ")))
            }
        }
        proto::PortNum::NodeinfoApp => {
            let u = proto::User::decode(payload).ok()?;
            let ln = escape_log(u.long_name.trim());
            let sn = escape_log(u.short_name.trim());
            match (ln.is_empty(), sn.is_empty()) {
                (false, false) => Some(format!("user {} ({})", ln, sn)),
                (true, true) => Some("user".to_string()),
                _ => Some(format!("user {}{}", ln, sn)),
            }
        }
        proto::PortNum::TelemetryApp => {
            let t = proto::Telemetry::decode(payload).ok()?;
            use proto::telemetry::Variant as TVar;
            match t.variant {
                Some(TVar::DeviceMetrics(dm)) => {
                    let mut parts: Vec<String> = Vec::new();
                    if let Some(batt) = dm.battery_level {
                        parts.push(format!("batt={}%", batt));
                    }
                    if let Some(v) = dm.voltage {
                        parts.push(format!("v={:.2}V", v));
                    }
                    if let Some(up) = dm.uptime_seconds {
                        parts.push(format!("up={}s", up));
                    }
                    if let Some(util) = dm.channel_utilization {
                        parts.push(format!("util={}", fmt_percent(util)));
                    }
                    if let Some(tx) = dm.air_util_tx {
                        parts.push(format!("tx={}", fmt_percent(tx)));
                    }
                    if parts.is_empty() {
                        Some("telemetry/device".to_string())
                    } else {
                        Some(format!("telemetry/device {}", parts.join(" ")))
                    }
                }
                Some(TVar::EnvironmentMetrics(env)) => {
                    let mut parts: Vec<String> = Vec::new();
                    if let Some(t) = env.temperature {
                        parts.push(format!("temp={:.1}C", t));
                    }
                    if let Some(h) = env.relative_humidity {
                        parts.push(format!("hum={:.0}%", h));
                    }
                    if let Some(p) = env.barometric_pressure {
                        parts.push(format!("press={:.0}hPa", p));
                    }
                    if parts.is_empty() {
                        Some("telemetry/env".to_string())
                    } else {
                        Some(format!("telemetry/env {}", parts.join(" ")))
                    }
                }
                None => Some("telemetry".to_string()),
            }
        }
        proto::PortNum::MapReportApp => {
            let r = proto::MapReport::decode(payload).ok()?;
            let mut out = format!("map_report {}", escape_log(r.long_name.trim()));
            if !r.firmware_version.is_empty() {
                out.push_str(&format!(" fw={}", escape_log(&r.firmware_version)));
            }
            if r.latitude_i != 0 || r.longitude_i != 0 {
                out.push_str(&format!(
                    " lat={:.5} lon={:.5}",
                    r.latitude_i as f64 / 1e7,
                    r.longitude_i as f64 / 1e7
                ));
            }
            out.push_str(&format!(" online={}", r.num_online_local_nodes));
            Some(out)
        }
        _ => None,
    }
}
