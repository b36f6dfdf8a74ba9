//! Forward one validated position to the tracking backend, provisioning the
//! device first when the backend does not know it yet.
//!
//! At most one lookup, one creation and one submission per call. Nothing is
//! retried and nothing is queued: a failed step drops this position.

use log::{error, info, warn};
use std::sync::Arc;

use super::{PositionReport, TrackingBackend};
use crate::logutil::escape_log;

/// What happened to a position handed to [`PositionSync::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Submitted,
    /// Lookup failed; nothing was created or submitted
    LookupFailed,
    /// Device was missing and could not be created; position dropped
    CreationFailed,
    SubmitFailed,
}

pub struct PositionSync {
    backend: Arc<dyn TrackingBackend>,
    id_prefix: String,
}

impl PositionSync {
    pub fn new(backend: Arc<dyn TrackingBackend>, id_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            id_prefix: id_prefix.into(),
        }
    }

    /// Backend unique id for a device identifier.
    pub fn backend_id(&self, device_id: &str) -> String {
        format!("{}{}", self.id_prefix, device_id)
    }

    /// Ensure the device exists, then submit `report`. `report.id` must already be
    /// the prefixed backend id.
    pub async fn sync(&self, report: PositionReport, display_name: &str) -> SyncOutcome {
        let unique_id = report.id.clone();

        let exists = match self.backend.device_exists(&unique_id).await {
            Ok(exists) => exists,
            Err(e) => {
                error!("Failed to look up device {}: {}", unique_id, e);
                return SyncOutcome::LookupFailed;
            }
        };

        if !exists {
            warn!(
                "Device with identifier {} does not exist in Traccar, creating it as '{}'",
                unique_id,
                escape_log(display_name)
            );
            match self.backend.create_device(&unique_id, display_name).await {
                Ok(true) => info!("Created Traccar device {}", unique_id),
                Ok(false) => {
                    error!(
                        "Failed to create device with identifier {}. Skipping position update.",
                        unique_id
                    );
                    return SyncOutcome::CreationFailed;
                }
                Err(e) => {
                    error!(
                        "Failed to create device with identifier {}: {}. Skipping position update.",
                        unique_id, e
                    );
                    return SyncOutcome::CreationFailed;
                }
            }
        }

        match self.backend.submit_position(&report).await {
            Ok(body) => {
                info!(
                    "Position sent to Traccar for device {} {}",
                    unique_id,
                    escape_log(body.trim())
                );
                SyncOutcome::Submitted
            }
            Err(e) => {
                error!("Failed to send position to Traccar for device {}: {}", unique_id, e);
                SyncOutcome::SubmitFailed
            }
        }
    }
}
