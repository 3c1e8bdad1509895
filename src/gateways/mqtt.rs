use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{GatewayError, Zigbee2mqttGateway};

const GATEWAY: &str = "zigbee2mqtt";
const KEEP_ALIVE: Duration = Duration::from_secs(15);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Zigbee2MQTT gateway over the shared broker. Device writes publish to
/// `<base_topic>/<friendly_name>/set`; the broker session lives on its own
/// task and rides out disconnects. A disconnected instance (no broker
/// configured) reports `not configured` on every write so rule firings get
/// a structured action error instead of hanging.
pub struct MqttZigbee2mqttGateway {
    client: Option<AsyncClient>,
    base_topic: String,
}

impl MqttZigbee2mqttGateway {
    pub fn disconnected(base_topic: &str) -> Self {
        Self {
            client: None,
            base_topic: normalize_base_topic(base_topic),
        }
    }

    /// Connects to the broker and spawns the session task. The task only
    /// ends with the process; rumqttc re-establishes the connection after
    /// the retry delay.
    pub fn connect(
        base_topic: &str,
        client_id: &str,
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(username), Some(password)) = (username, password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    tracing::warn!(error = %err, "zigbee2mqtt broker connection lost; retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        });

        Ok((
            Self {
                client: Some(client),
                base_topic: normalize_base_topic(base_topic),
            },
            handle,
        ))
    }

    fn write_topic(&self, entity_id: &str) -> String {
        format!("{}/{}/set", self.base_topic, entity_id)
    }
}

fn normalize_base_topic(base_topic: &str) -> String {
    let trimmed = base_topic.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "zigbee2mqtt".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl Zigbee2mqttGateway for MqttZigbee2mqttGateway {
    async fn set_entity_value(
        &self,
        entity_id: &str,
        value: &JsonValue,
    ) -> Result<(), GatewayError> {
        let Some(client) = &self.client else {
            return Err(GatewayError::NotConfigured { gateway: GATEWAY });
        };
        let payload = serde_json::to_vec(value).map_err(|err| GatewayError::Operation {
            gateway: GATEWAY,
            operation: "set_entity_value".to_string(),
            message: err.to_string(),
        })?;
        client
            .publish(self.write_topic(entity_id), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| GatewayError::Operation {
                gateway: GATEWAY,
                operation: "set_entity_value".to_string(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn disconnected_gateway_reports_not_configured() {
        let gateway = MqttZigbee2mqttGateway::disconnected("zigbee2mqtt");
        let err = gateway
            .set_entity_value("kitchen_light", &json!({"state": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured { .. }));
    }

    #[test]
    fn write_topic_uses_friendly_name_under_base_topic() {
        let gateway = MqttZigbee2mqttGateway::disconnected("zigbee2mqtt/");
        assert_eq!(gateway.write_topic("kitchen_light"), "zigbee2mqtt/kitchen_light/set");

        let gateway = MqttZigbee2mqttGateway::disconnected("  ");
        assert_eq!(gateway.write_topic("plug"), "zigbee2mqtt/plug/set");
    }
}
