use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::sync::RwLock;

use crate::store::profiles::SettingsProfile;

/// Providers are configured per settings profile under the
/// `notification_providers` entry: `[{"id": "...", "enabled": true, ...}]`.
const PROVIDERS_SETTING_KEY: &str = "notification_providers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationDelivery {
    pub id: i64,
    pub provider_key: String,
    pub message: String,
    pub title: Option<String>,
    pub data: Option<JsonValue>,
    pub rule_name: Option<String>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl NotificationDelivery {
    pub fn as_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "provider_key": self.provider_key,
            "message": self.message,
            "title": self.title,
            "data": self.data,
            "rule_name": self.rule_name,
            "status": self.status.as_str(),
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub success: bool,
    pub error_code: Option<String>,
    pub message: String,
}

impl EnqueueResult {
    fn ok() -> Self {
        Self {
            success: true,
            error_code: None,
            message: "queued".to_string(),
        }
    }

    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

struct OutboxState {
    next_id: i64,
    deliveries: Vec<NotificationDelivery>,
}

/// In-memory notification outbox. Enqueue validates the provider against the
/// active settings profile and records a pending delivery; a transport-side
/// sender drains pending rows outside this core.
pub struct NotificationOutbox {
    inner: RwLock<OutboxState>,
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(OutboxState {
                next_id: 1,
                deliveries: Vec::new(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        profile: &SettingsProfile,
        provider_id: &str,
        message: &str,
        title: Option<&str>,
        data: Option<&JsonValue>,
        rule_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> (Option<NotificationDelivery>, EnqueueResult) {
        let Some(provider) = find_provider(profile, provider_id) else {
            return (
                None,
                EnqueueResult::error("unknown_provider", format!("Unknown provider '{provider_id}'")),
            );
        };
        let enabled = provider
            .get("enabled")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);
        if !enabled {
            return (
                None,
                EnqueueResult::error(
                    "provider_disabled",
                    format!("Provider '{provider_id}' is disabled"),
                ),
            );
        }

        let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        let delivery = NotificationDelivery {
            id,
            provider_key: provider_id.to_string(),
            message: message.to_string(),
            title: title.map(str::to_string),
            data: data.cloned(),
            rule_name: rule_name.map(str::to_string),
            status: DeliveryStatus::Pending,
            created_at: now,
        };
        inner.deliveries.push(delivery.clone());
        (Some(delivery), EnqueueResult::ok())
    }

    pub fn pending(&self) -> Vec<NotificationDelivery> {
        self.inner
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .deliveries
            .iter()
            .filter(|delivery| delivery.status == DeliveryStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .deliveries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationOutbox {
    fn default() -> Self {
        Self::new()
    }
}

fn find_provider<'a>(profile: &'a SettingsProfile, provider_id: &str) -> Option<&'a JsonValue> {
    profile
        .setting_json(PROVIDERS_SETTING_KEY)
        .and_then(JsonValue::as_array)?
        .iter()
        .find(|provider| {
            provider
                .get("id")
                .and_then(JsonValue::as_str)
                .is_some_and(|id| id == provider_id)
        })
}
