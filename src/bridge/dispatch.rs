//! Port-number routing of decoded `Data` messages.
//!
//! Handlers register for one port each. Ports without a handler are dropped
//! silently: most mesh traffic (text, routing, traceroute...) is of no interest
//! to the bridge. Handler failures are logged here and never propagate.

use async_trait::async_trait;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{BridgeError, BridgeResult};
use crate::meshtastic::PacketContext;
use crate::protobuf::meshtastic_generated as proto;

/// A handler for one application port.
#[async_trait]
pub trait PortHandler: Send + Sync {
    /// Port this handler consumes.
    fn port(&self) -> proto::PortNum;

    /// Parse `payload` and apply it. Errors are reported, not retried.
    async fn handle(&self, ctx: &PacketContext, payload: &[u8]) -> BridgeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler registered for the port
    Ignored,
    Handled(proto::PortNum),
    /// Handler ran and reported an error (already logged)
    Failed(proto::PortNum),
}

#[derive(Default, Clone)]
pub struct PortDispatcher {
    handlers: HashMap<i32, Arc<dyn PortHandler>>,
}

impl PortDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for its port, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn PortHandler>) -> &mut Self {
        self.handlers.insert(handler.port() as i32, handler);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn PortHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn handles(&self, portnum: i32) -> bool {
        self.handlers.contains_key(&portnum)
    }

    pub async fn dispatch(&self, ctx: &PacketContext, data: &proto::Data) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&data.portnum) else {
            return DispatchOutcome::Ignored;
        };
        let port = handler.port();
        match handler.handle(ctx, &data.payload).await {
            Ok(()) => DispatchOutcome::Handled(port),
            Err(e @ BridgeError::Validation(_)) => {
                debug!(
                    "Skipping {} packet {} from {}: {}",
                    port.as_str_name(),
                    ctx.packet_id,
                    ctx.device_id,
                    e
                );
                DispatchOutcome::Failed(port)
            }
            Err(e) => {
                warn!(
                    "Failed to handle {} packet {} from {}: {}",
                    port.as_str_name(),
                    ctx.packet_id,
                    ctx.device_id,
                    e
                );
                DispatchOutcome::Failed(port)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        port: proto::PortNum,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PortHandler for CountingHandler {
        fn port(&self) -> proto::PortNum {
            self.port
        }

        async fn handle(&self, _ctx: &PacketContext, _payload: &[u8]) -> BridgeResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BridgeError::Validation("nope".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn ctx() -> PacketContext {
        PacketContext {
            device_id: "!00000001".to_string(),
            from: 1,
            to: 0xffffffff,
            packet_id: 5,
            channel_id: "LongFast".to_string(),
            gateway_id: String::new(),
            rx_time: 0,
        }
    }

    fn data(portnum: i32) -> proto::Data {
        proto::Data {
            portnum,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn routes_by_port_and_ignores_unknown() {
        let position = Arc::new(CountingHandler {
            port: proto::PortNum::PositionApp,
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let dispatcher = PortDispatcher::new().with_handler(position.clone());

        assert_eq!(
            dispatcher.dispatch(&ctx(), &data(3)).await,
            DispatchOutcome::Handled(proto::PortNum::PositionApp)
        );
        assert_eq!(dispatcher.dispatch(&ctx(), &data(9999)).await, DispatchOutcome::Ignored);
        assert_eq!(dispatcher.dispatch(&ctx(), &data(1)).await, DispatchOutcome::Ignored);
        assert_eq!(position.calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.handles(3));
        assert!(!dispatcher.handles(9999));
    }

    #[tokio::test]
    async fn handler_errors_do_not_propagate() {
        let failing = Arc::new(CountingHandler {
            port: proto::PortNum::NodeinfoApp,
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let dispatcher = PortDispatcher::new().with_handler(failing);
        assert_eq!(
            dispatcher.dispatch(&ctx(), &data(4)).await,
            DispatchOutcome::Failed(proto::PortNum::NodeinfoApp)
        );
    }
}
