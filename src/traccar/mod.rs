//! Traccar tracking backend.
//!
//! Two APIs are involved: the authenticated management API, used to look up and
//! provision devices, and the unauthenticated OsmAnd endpoint that ingests
//! positions as query parameters.

pub mod sync;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TraccarConfig;
use crate::errors::{BridgeError, BridgeResult};
use crate::logutil::escape_log;

pub use sync::{PositionSync, SyncOutcome};

/// One position submission in OsmAnd protocol terms.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    /// Prefixed device identifier (Traccar `uniqueId`)
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    /// Fix time in milliseconds since the unix epoch
    pub timestamp_ms: u64,
    pub altitude: Option<i32>,
    pub speed: u32,
    pub bearing: u32,
    pub accuracy: u32,
    pub battery: Option<u32>,
}

impl PositionReport {
    /// Query parameters in submission order. Unknown values are left out
    /// rather than sent empty.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("id", self.id.clone()),
            ("lat", self.lat.to_string()),
            ("lon", self.lon.to_string()),
            ("timestamp", self.timestamp_ms.to_string()),
        ];
        if let Some(alt) = self.altitude {
            pairs.push(("altitude", alt.to_string()));
        }
        pairs.push(("speed", self.speed.to_string()));
        pairs.push(("bearing", self.bearing.to_string()));
        pairs.push(("accuracy", self.accuracy.to_string()));
        if let Some(batt) = self.battery {
            pairs.push(("batt", batt.to_string()));
        }
        pairs
    }

    /// URL-encoded query string.
    pub fn query_string(&self) -> String {
        self.query_pairs()
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Remote device registry and position sink.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Whether a device with this unique id is registered.
    async fn device_exists(&self, unique_id: &str) -> BridgeResult<bool>;

    /// Register a device. `Ok(false)` means the backend refused it without a
    /// reason; backends that report one return [`BridgeError::Backend`].
    async fn create_device(&self, unique_id: &str, name: &str) -> BridgeResult<bool>;

    /// Submit a position; returns the backend's response body.
    async fn submit_position(&self, report: &PositionReport) -> BridgeResult<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraccarDevice {
    #[serde(default)]
    unique_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewDevice<'a> {
    name: &'a str,
    unique_id: &'a str,
}

/// reqwest-based client for a Traccar server.
pub struct TraccarClient {
    config: TraccarConfig,
    client: reqwest::Client,
}

impl TraccarClient {
    pub fn new(config: TraccarConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Build the OsmAnd submission URL for a report.
    pub fn osmand_url(&self, report: &PositionReport) -> String {
        format!(
            "{}/?{}",
            self.config.osmand_url.trim_end_matches('/'),
            report.query_string()
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.config.token {
            request.bearer_auth(token)
        } else if let Some(user) = &self.config.username {
            request.basic_auth(user, self.config.password.as_ref())
        } else {
            request
        }
    }
}

/// Prefer the response body as error detail; fall back to the status line.
async fn failure_detail(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.trim().is_empty() => format!("{}: {}", status, escape_log(body.trim())),
        _ => status.to_string(),
    }
}

#[async_trait]
impl TrackingBackend for TraccarClient {
    async fn device_exists(&self, unique_id: &str) -> BridgeResult<bool> {
        let url = self.api_url(&format!(
            "/api/devices?uniqueId={}",
            urlencoding::encode(unique_id)
        ));
        debug!("Checking Traccar device {}", unique_id);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BridgeError::backend("device lookup", e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::backend(
                "device lookup",
                failure_detail(response).await,
            ));
        }
        let devices: Vec<TraccarDevice> = response
            .json()
            .await
            .map_err(|e| BridgeError::backend("device lookup", e.to_string()))?;
        Ok(devices.iter().any(|d| d.unique_id == unique_id))
    }

    async fn create_device(&self, unique_id: &str, name: &str) -> BridgeResult<bool> {
        let url = self.api_url("/api/devices");
        let body = NewDevice { name, unique_id };
        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::backend("device creation", e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::backend(
                "device creation",
                failure_detail(response).await,
            ));
        }
        Ok(true)
    }

    async fn submit_position(&self, report: &PositionReport) -> BridgeResult<String> {
        let url = self.osmand_url(report);
        debug!("Submitting position: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::backend("position submission", e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::backend(
                "position submission",
                failure_detail(response).await,
            ));
        }
        response
            .text()
            .await
            .map_err(|e| BridgeError::backend("position submission", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> PositionReport {
        PositionReport {
            id: "mesh-!a1b2c3d4".to_string(),
            lat: 377749000f64 / 1e7,
            lon: -1224194000f64 / 1e7,
            timestamp_ms: 1_700_000_000_000,
            altitude: Some(10),
            speed: 3,
            bearing: 270,
            accuracy: 0,
            battery: None,
        }
    }

    #[test]
    fn query_omits_unknown_battery() {
        let pairs = report().query_pairs();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["id", "lat", "lon", "timestamp", "altitude", "speed", "bearing", "accuracy"]
        );
        assert!(pairs.contains(&("lat", "37.7749".to_string())));
        assert!(pairs.contains(&("lon", "-122.4194".to_string())));
    }

    #[test]
    fn query_includes_battery_and_drops_missing_altitude() {
        let mut r = report();
        r.battery = Some(80);
        r.altitude = None;
        let query = r.query_string();
        assert!(query.ends_with("&batt=80"), "{}", query);
        assert!(!query.contains("altitude"));
    }

    /// Serve one canned HTTP response on a loopback port and return its base URL.
    async fn one_shot_server(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn refused_creation_reports_server_reason() {
        let api_url = one_shot_server(
            "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: 26\r\nConnection: close\r\n\r\nDuplicate entry: uniqueId!",
        )
        .await;
        let config = TraccarConfig {
            api_url,
            ..crate::config::Config::default().traccar
        };
        let client = TraccarClient::new(config).unwrap();

        let err = client
            .create_device("!a1b2c3d4", "Device !a1b2c3d4")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("device creation"), "{}", msg);
        assert!(msg.contains("400"), "{}", msg);
        assert!(msg.contains("Duplicate entry"), "{}", msg);
    }

    #[tokio::test]
    async fn accepted_creation_is_true() {
        let api_url = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await;
        let config = TraccarConfig {
            api_url,
            ..crate::config::Config::default().traccar
        };
        let client = TraccarClient::new(config).unwrap();
        assert!(client.create_device("!a1b2c3d4", "x").await.unwrap());
    }

    #[test]
    fn osmand_url_encodes_identifier() {
        let client = TraccarClient::new(crate::config::Config::default().traccar).unwrap();
        let url = client.osmand_url(&report());
        assert!(
            url.starts_with("http://localhost:5055/?id=mesh-%21a1b2c3d4&lat=37.7749&lon=-122.4194"),
            "{}",
            url
        );
    }
}
