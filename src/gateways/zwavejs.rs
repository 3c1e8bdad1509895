use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{GatewayError, ZwavejsGateway};

const GATEWAY: &str = "zwavejs";

/// Placeholder Z-Wave JS gateway used until a websocket driver connection is
/// configured; every write reports `not configured` so rule firings surface
/// a structured action error instead of hanging.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredZwavejsGateway;

#[async_trait]
impl ZwavejsGateway for UnconfiguredZwavejsGateway {
    async fn set_value(
        &self,
        _node_id: i64,
        _endpoint: i64,
        _command_class: i64,
        _property: &JsonValue,
        _property_key: Option<&JsonValue>,
        _value: &JsonValue,
    ) -> Result<(), GatewayError> {
        Err(GatewayError::NotConfigured { gateway: GATEWAY })
    }
}
