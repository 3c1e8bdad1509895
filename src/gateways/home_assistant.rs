use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use url::Url;

use super::{GatewayError, HomeAssistantGateway};

const GATEWAY: &str = "home_assistant";

/// REST client for the Home Assistant HTTP API. Unconfigured instances
/// report `not configured` instead of failing at startup.
pub struct HttpHomeAssistantGateway {
    http: reqwest::Client,
    base_url: Option<Url>,
    token: Option<String>,
    default_timeout: Duration,
}

impl HttpHomeAssistantGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: Option<&str>,
        token: Option<&str>,
        timeout_seconds: u64,
    ) -> Self {
        let base_url = base_url.and_then(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(url = raw, error = %err, "invalid home assistant base url");
                None
            }
        });
        Self {
            http,
            base_url,
            token: token.map(str::to_string),
            default_timeout: Duration::from_secs(timeout_seconds),
        }
    }

    fn credentials(&self) -> Result<(&Url, &str), GatewayError> {
        match (&self.base_url, &self.token) {
            (Some(base_url), Some(token)) => Ok((base_url, token)),
            _ => Err(GatewayError::NotConfigured { gateway: GATEWAY }),
        }
    }

    fn endpoint(base_url: &Url, path: &str) -> Result<Url, GatewayError> {
        base_url.join(path).map_err(|err| GatewayError::Operation {
            gateway: GATEWAY,
            operation: "build_url".to_string(),
            message: err.to_string(),
        })
    }

    fn map_send_error(operation: &str, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::OperationTimeout {
                gateway: GATEWAY,
                operation: operation.to_string(),
            }
        } else {
            GatewayError::Unreachable {
                gateway: GATEWAY,
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl HomeAssistantGateway for HttpHomeAssistantGateway {
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: Option<&JsonValue>,
        service_data: Option<&JsonValue>,
        timeout_seconds: Option<f64>,
    ) -> Result<JsonValue, GatewayError> {
        let (base_url, token) = self.credentials()?;
        let url = Self::endpoint(base_url, &format!("api/services/{domain}/{service}"))?;

        let mut body: Map<String, JsonValue> = service_data
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        if let Some(target) = target {
            body.insert("target".to_string(), target.clone());
        }

        let timeout = timeout_seconds
            .filter(|value| *value > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.default_timeout);

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .timeout(timeout)
            .json(&JsonValue::Object(body))
            .send()
            .await
            .map_err(|err| Self::map_send_error("call_service", err))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Operation {
                gateway: GATEWAY,
                operation: "call_service".to_string(),
                message: format!("{status}: {message}"),
            });
        }
        Ok(response.json().await.unwrap_or(JsonValue::Null))
    }

    async fn get_states(&self) -> Result<Vec<JsonValue>, GatewayError> {
        let (base_url, token) = self.credentials()?;
        let url = Self::endpoint(base_url, "api/states")?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .timeout(self.default_timeout)
            .send()
            .await
            .map_err(|err| Self::map_send_error("get_states", err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Operation {
                gateway: GATEWAY,
                operation: "get_states".to_string(),
                message: status.to_string(),
            });
        }
        response
            .json::<Vec<JsonValue>>()
            .await
            .map_err(|err| GatewayError::Operation {
                gateway: GATEWAY,
                operation: "get_states".to_string(),
                message: err.to_string(),
            })
    }
}
