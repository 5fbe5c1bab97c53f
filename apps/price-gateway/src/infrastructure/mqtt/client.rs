//! rumqttc broker connector.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode, TlsConfiguration, Transport,
};

use super::tls::relaxed_client_config;
use crate::application::ports::{
    BrokerConnection, BrokerConnector, BrokerEvent, ConnectOptions, TransportError,
};
use crate::infrastructure::config::BrokerSettings;

/// How long `close` waits for the DISCONNECT to be flushed.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// MQTT connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConnectorConfig {
    /// Broker URL (`wss://host:port/path`).
    pub url: String,
    /// Broker port.
    pub port: u16,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Capacity of the client request queue.
    pub request_capacity: usize,
}

impl MqttConnectorConfig {
    /// Build connector settings for a broker.
    #[must_use]
    pub fn from_settings(broker: &BrokerSettings) -> Self {
        Self {
            url: broker.url(),
            port: broker.port,
            keep_alive: Duration::from_secs(30),
            request_capacity: 10,
        }
    }
}

/// Opens one `rumqttc` client per session.
pub struct MqttBrokerConnector {
    config: MqttConnectorConfig,
    tls: Arc<rustls::ClientConfig>,
}

impl MqttBrokerConnector {
    /// Create a connector with relaxed certificate validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built.
    pub fn new(config: MqttConnectorConfig) -> Result<Self, TransportError> {
        let tls = relaxed_client_config().map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            config,
            tls: Arc::new(tls),
        })
    }

    /// Connector settings.
    #[must_use]
    pub const fn config(&self) -> &MqttConnectorConfig {
        &self.config
    }

    fn mqtt_options(&self, options: ConnectOptions) -> MqttOptions {
        let mut mqtt = MqttOptions::new(options.client_id, self.config.url.clone(), self.config.port);
        mqtt.set_credentials(
            options.credentials.investor_id(),
            options.credentials.investor_token(),
        );
        mqtt.set_keep_alive(self.config.keep_alive);
        mqtt.set_clean_session(true);
        mqtt.set_transport(Transport::wss_with_config(TlsConfiguration::Rustls(
            Arc::clone(&self.tls),
        )));
        mqtt
    }
}

impl std::fmt::Debug for MqttBrokerConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBrokerConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnector for MqttBrokerConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        tracing::debug!(
            client_id = %options.client_id,
            url = %self.config.url,
            "Opening MQTT connection"
        );
        let (client, eventloop) =
            AsyncClient::new(self.mqtt_options(options), self.config.request_capacity);
        Ok(Box::new(MqttConnection {
            client,
            eventloop,
            connected: false,
            closed: false,
        }))
    }
}

/// A single `rumqttc` client and its event loop.
struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: bool,
    closed: bool,
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn next_event(&mut self) -> BrokerEvent {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.connected = true;
                    return BrokerEvent::ConnAck;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    return BrokerEvent::SubAck(suback_result(&ack.return_codes));
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return BrokerEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    };
                }
                Ok(Event::Incoming(Packet::Disconnect)) => return BrokerEvent::Closed,
                Ok(_) => {}
                Err(e) => {
                    self.connected = false;
                    return BrokerEvent::Error(describe_connection_error(&e));
                }
            }
        }
    }

    async fn unsubscribe(&mut self, topic: &str) {
        if let Err(e) = self.client.try_unsubscribe(topic) {
            tracing::debug!(topic, error = %e, "Failed to queue unsubscribe");
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.connected || self.client.try_disconnect().is_err() {
            return;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await.is_err() {
            tracing::debug!("Timed out flushing MQTT disconnect");
        }
    }
}

/// Map SUBACK return codes to a subscription result.
fn suback_result(codes: &[SubscribeReasonCode]) -> Result<(), String> {
    if codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        Err("Subscription rejected by broker".to_string())
    } else {
        Ok(())
    }
}

/// Render a connection error so broker refusals keep their MQTT wording.
fn describe_connection_error(error: &ConnectionError) -> String {
    match error {
        ConnectionError::ConnectionRefused(code) => refusal_message(code),
        other => other.to_string(),
    }
}

fn refusal_message(code: &ConnectReturnCode) -> String {
    match code {
        ConnectReturnCode::BadUserNamePassword => {
            "Connection refused: Bad User Name or Password".to_string()
        }
        ConnectReturnCode::NotAuthorized => "Connection refused: Not authorized".to_string(),
        other => format!("Connection refused: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::is_auth_failure;

    #[test]
    fn config_uses_broker_url() {
        let config = MqttConnectorConfig::from_settings(&BrokerSettings::default());
        assert_eq!(config.url, "wss://datafeed-lts-krx.dnse.com.vn:443/wss");
        assert_eq!(config.port, 443);
    }

    #[test]
    fn suback_failure_is_rejection() {
        assert!(suback_result(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]).is_ok());
        assert!(suback_result(&[SubscribeReasonCode::Failure]).is_err());
    }

    #[test]
    fn refusals_match_auth_signatures() {
        let bad = describe_connection_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        let unauthorized = describe_connection_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        let unavailable = describe_connection_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));

        assert!(is_auth_failure(&bad));
        assert!(is_auth_failure(&unauthorized));
        assert!(!is_auth_failure(&unavailable));
    }

    #[tokio::test]
    async fn connect_does_not_block_on_network() {
        let connector =
            MqttBrokerConnector::new(MqttConnectorConfig::from_settings(&BrokerSettings::default()))
                .unwrap();
        let options = ConnectOptions {
            client_id: "dnse-price-json-mqtt-ws-sub-test".to_string(),
            credentials: crate::domain::quote::Credentials::new("t", "i"),
        };
        let mut conn = connector.connect(options).await.unwrap();
        conn.close().await;
    }
}
