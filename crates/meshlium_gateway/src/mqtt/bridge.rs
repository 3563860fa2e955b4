use crate::domain::{TransportEvent, TransportEventSender};
use crate::mqtt::{
    parse_broker_url, parse_presence_topic, ClientPresence, CLIENT_CONNECTED_FILTER,
    CLIENT_DISCONNECTED_FILTER,
};
use bytes::Bytes;
use common::domain::{DomainError, DomainResult};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttBridgeConfig {
    pub broker_url: String,
    pub client_id: String,
    pub topic: String,

    /// Also subscribe to `$SYS` client presence topics
    pub sys_topics_enabled: bool,

    /// Consecutive failed connections before giving up (default: 3)
    pub max_retry_attempts: u32,

    /// Delay between connection attempts (default: 10 seconds)
    pub retry_delay_secs: u64,

    pub keep_alive_secs: u64,
}

impl Default for MqttBridgeConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "meshlium-gateway".to_string(),
            topic: "meshlium".to_string(),
            sys_topics_enabled: false,
            max_retry_attempts: 3,
            retry_delay_secs: 10,
            keep_alive_secs: 30,
        }
    }
}

impl MqttBridgeConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

struct ConnectionFailure {
    error: DomainError,
    established: bool,
}

/// Subscribes to the broker and turns what arrives into transport events.
pub struct MqttBridge {
    config: MqttBridgeConfig,
    events: TransportEventSender,
}

impl MqttBridge {
    pub fn new(config: MqttBridgeConfig, events: TransportEventSender) -> Self {
        Self { config, events }
    }

    /// Runs until `shutdown` is cancelled, reconnecting on errors. Returns
    /// `TransportFatal` once the retry budget is spent.
    #[instrument(name = "mqtt_bridge", skip_all, fields(broker_url = %self.config.broker_url))]
    pub async fn run(self, shutdown: CancellationToken) -> DomainResult<()> {
        info!(topic = %self.config.topic, "starting MQTT bridge");

        let mut failures = 0;
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_connection(&shutdown).await {
                Ok(()) => break,
                Err(failure) => {
                    if failure.established {
                        failures = 0;
                    }
                    failures += 1;
                    error!(error = %failure.error, attempt = failures, "MQTT connection error");

                    if let DomainError::InvalidGatewayConfig(_) = failure.error {
                        return Err(DomainError::TransportFatal(failure.error.to_string()));
                    }

                    if failures >= self.config.max_retry_attempts {
                        error!(
                            max_retries = self.config.max_retry_attempts,
                            "max retry attempts reached, stopping MQTT bridge"
                        );
                        return Err(DomainError::TransportFatal(format!(
                            "MQTT broker {} unreachable after {} attempts: {}",
                            self.config.broker_url, failures, failure.error
                        )));
                    }

                    warn!(
                        attempt = failures,
                        max_attempts = self.config.max_retry_attempts,
                        "retrying MQTT connection"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_delay()) => {}
                    }
                }
            }
        }

        info!("MQTT bridge stopped");
        Ok(())
    }

    async fn run_connection(&self, shutdown: &CancellationToken) -> Result<(), ConnectionFailure> {
        let fail = |error: DomainError, established: bool| ConnectionFailure { error, established };

        let (host, port) =
            parse_broker_url(&self.config.broker_url).map_err(|e| fail(e, false))?;

        let mut options = MqttOptions::new(&self.config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        let mut filters = vec![self.config.topic.clone()];
        if self.config.sys_topics_enabled {
            filters.push(CLIENT_CONNECTED_FILTER.to_string());
            filters.push(CLIENT_DISCONNECTED_FILTER.to_string());
        }
        for filter in &filters {
            client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| {
                    fail(
                        DomainError::RepositoryError(anyhow::anyhow!("Failed to subscribe: {}", e)),
                        false,
                    )
                })?;
        }

        let mut established = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("shutdown signal received, disconnecting");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        established = true;
                        info!(filters = ?filters, "connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let event = translate_publish(&self.config.topic, &publish.topic, publish.payload);
                        if let Some(event) = event {
                            if self.events.send(event).await.is_err() {
                                debug!("ingestion service gone, stopping MQTT bridge");
                                let _ = client.disconnect().await;
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(fail(
                            DomainError::RepositoryError(anyhow::anyhow!("MQTT event loop error: {}", e)),
                            established,
                        ));
                    }
                }
            }
        }
    }
}

/// Maps an incoming publish to a transport event; unrelated topics map to `None`.
pub fn translate_publish(topic_filter: &str, topic: &str, payload: Bytes) -> Option<TransportEvent> {
    if let Some(presence) = parse_presence_topic(topic) {
        return Some(match presence {
            ClientPresence::Connected(client_id) => TransportEvent::Connected { client_id },
            ClientPresence::Disconnected(client_id) => TransportEvent::Disconnected { client_id },
        });
    }

    if topic != topic_filter {
        debug!(topic = %topic, "ignoring publish on unrelated topic");
        return None;
    }

    Some(TransportEvent::Message {
        topic: topic.to_string(),
        payload,
        client_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transport_channel;

    #[test]
    fn test_translate_reading_publish() {
        let event = translate_publish("meshlium", "meshlium", Bytes::from_static(b"{}"));
        assert!(matches!(
            event,
            Some(TransportEvent::Message { ref topic, ref payload, client_id: None })
                if topic == "meshlium" && payload.as_ref() == b"{}"
        ));
    }

    #[test]
    fn test_translate_presence_publish() {
        let event = translate_publish(
            "meshlium",
            "$SYS/brokers/node1/clients/meshlium-01/connected",
            Bytes::new(),
        );
        assert!(matches!(
            event,
            Some(TransportEvent::Connected { ref client_id }) if client_id == "meshlium-01"
        ));
    }

    #[test]
    fn test_translate_drops_unrelated_topics() {
        assert!(translate_publish("meshlium", "other/topic", Bytes::new()).is_none());
    }

    #[tokio::test]
    async fn test_invalid_broker_url_is_fatal_without_retry() {
        let (events, _receiver) = transport_channel();
        let bridge = MqttBridge::new(
            MqttBridgeConfig {
                broker_url: "mqtt://broker:notaport".to_string(),
                ..Default::default()
            },
            events,
        );

        let result = bridge.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(DomainError::TransportFatal(_))));
    }

    #[tokio::test]
    async fn test_cancelled_bridge_returns_immediately() {
        let (events, _receiver) = transport_channel();
        let bridge = MqttBridge::new(MqttBridgeConfig::default(), events);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(bridge.run(shutdown).await.is_ok());
    }
}
