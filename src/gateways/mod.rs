use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt::{self, Display};
use std::sync::Arc;

use crate::error::AppError;

pub mod home_assistant;
pub mod mqtt;
pub mod notifications;
pub mod zwavejs;

pub use home_assistant::HttpHomeAssistantGateway;
pub use mqtt::MqttZigbee2mqttGateway;
pub use notifications::{EnqueueResult, NotificationDelivery, NotificationOutbox};
pub use zwavejs::UnconfiguredZwavejsGateway;

/// Failure surface shared by all gateway defaults. Action handlers flatten
/// these into per-action error strings; API routes map them onto the error
/// taxonomy (`service_unavailable`, `gateway_error`, `timeout`).
#[derive(Debug, Clone)]
pub enum GatewayError {
    NotConfigured {
        gateway: &'static str,
    },
    Unreachable {
        gateway: &'static str,
        message: String,
    },
    OperationTimeout {
        gateway: &'static str,
        operation: String,
    },
    Operation {
        gateway: &'static str,
        operation: String,
        message: String,
    },
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NotConfigured { gateway } => {
                write!(f, "{gateway} gateway is not configured")
            }
            GatewayError::Unreachable { gateway, message } => {
                write!(f, "{gateway} gateway is not reachable: {message}")
            }
            GatewayError::OperationTimeout { gateway, operation } => {
                write!(f, "{gateway} {operation} timed out")
            }
            GatewayError::Operation {
                gateway,
                operation,
                message,
            } => write!(f, "{gateway} {operation} failed: {message}"),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::NotConfigured { .. } | GatewayError::Unreachable { .. } => {
                AppError::service_unavailable(err.to_string())
            }
            GatewayError::OperationTimeout { .. } => AppError::timeout(err.to_string()),
            GatewayError::Operation {
                gateway, operation, ..
            } => AppError::gateway(*gateway, operation.clone(), err.to_string()),
        }
    }
}

#[async_trait]
pub trait HomeAssistantGateway: Send + Sync {
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: Option<&JsonValue>,
        service_data: Option<&JsonValue>,
        timeout_seconds: Option<f64>,
    ) -> Result<JsonValue, GatewayError>;

    async fn get_states(&self) -> Result<Vec<JsonValue>, GatewayError>;
}

#[async_trait]
pub trait Zigbee2mqttGateway: Send + Sync {
    async fn set_entity_value(
        &self,
        entity_id: &str,
        value: &JsonValue,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ZwavejsGateway: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn set_value(
        &self,
        node_id: i64,
        endpoint: i64,
        command_class: i64,
        property: &JsonValue,
        property_key: Option<&JsonValue>,
        value: &JsonValue,
    ) -> Result<(), GatewayError>;
}

/// Typed bundle of gateway capabilities handed to action handlers. One
/// concrete default per capability; tests substitute fakes.
#[derive(Clone)]
pub struct ActionGateways {
    pub ha: Arc<dyn HomeAssistantGateway>,
    pub zigbee2mqtt: Arc<dyn Zigbee2mqttGateway>,
    pub zwavejs: Arc<dyn ZwavejsGateway>,
    pub notifications: Arc<NotificationOutbox>,
}
