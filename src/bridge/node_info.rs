//! NODEINFO_APP: remember the device's advertised identity.

use async_trait::async_trait;
use log::debug;
use prost::Message;
use std::sync::Arc;

use super::dispatch::PortHandler;
use crate::cache::DeviceCache;
use crate::errors::{BridgeError, BridgeResult};
use crate::logutil::escape_log;
use crate::meshtastic::PacketContext;
use crate::protobuf::meshtastic_generated as proto;

pub struct NodeInfoHandler {
    cache: Arc<DeviceCache>,
}

impl NodeInfoHandler {
    pub fn new(cache: Arc<DeviceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PortHandler for NodeInfoHandler {
    fn port(&self) -> proto::PortNum {
        proto::PortNum::NodeinfoApp
    }

    async fn handle(&self, ctx: &PacketContext, payload: &[u8]) -> BridgeResult<()> {
        let user = proto::User::decode(payload).map_err(|source| BridgeError::PayloadDecode {
            port: "NODEINFO_APP",
            source,
        })?;

        debug!(
            "NODEINFO_APP id={} from={} to={} long_name={:?} short_name={:?} hw_model={} role={}",
            ctx.packet_id,
            ctx.device_id,
            ctx.to_hex(),
            escape_log(&user.long_name),
            escape_log(&user.short_name),
            user.hw_model,
            user.role
        );

        // Identity does not count as an update of the device's state.
        self.cache
            .update(&ctx.device_id, |entry| entry.last_node_info = Some(user));
        Ok(())
    }
}
