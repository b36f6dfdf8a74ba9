//! MQTT transport: subscribe to the mesh topic and feed each publish to the
//! [`MessageIngress`]. Runs until Ctrl-C.
//!
//! The subscription is re-issued on every `ConnAck` so a broker restart does not
//! leave the bridge connected but deaf. Each message is processed on its own
//! task; ordering per device is restored by the ingress device locks.

use anyhow::Result;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::MessageIngress;
use crate::config::MqttConfig;

/// Connect, subscribe and pump messages. Connection errors are retried after
/// `reconnect_delay_seconds`; returns once Ctrl-C is received.
pub async fn run_subscriber(config: &MqttConfig, ingress: Arc<MessageIngress>) -> Result<()> {
    let (host, port) = config.host_and_port()?;
    let client_id = config.effective_client_id();

    info!(
        "Starting MQTT subscriber for {}:{} (client_id={}, topic={})",
        host, port, client_id, config.topic
    );

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
    options.set_clean_session(true);
    options.set_max_packet_size(256 * 1024, 256 * 1024);
    if let Some(user) = &config.username {
        options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    let retry_delay = Duration::from_secs(config.reconnect_delay_seconds.max(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, disconnecting from MQTT broker");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(
                            "MQTT publish on {} ({} bytes)",
                            publish.topic,
                            publish.payload.len()
                        );
                        let ingress = Arc::clone(&ingress);
                        tokio::spawn(async move {
                            ingress.handle_message(&publish.topic, &publish.payload).await;
                        });
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        subscribe(&client, &config.topic).await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!("Subscribed to {}", config.topic);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        warn!("Reconnecting in {}s", retry_delay.as_secs());
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {
                                info!("Shutdown signal received while reconnecting");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Request the subscription. A failure is logged and the connection kept; the
/// next `ConnAck` retries it.
async fn subscribe(client: &AsyncClient, topic: &str) -> bool {
    match client.subscribe(topic, QoS::AtMostOnce).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to subscribe to {}: {}", topic, e);
            false
        }
    }
}
