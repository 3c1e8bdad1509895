use anyhow::Result;
use std::path::PathBuf;

const DEFAULT_DATA_ROOT: &str = "/var/lib/alarm-server";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_root: PathBuf,
    pub system_config_path: PathBuf,
    pub mqtt_host: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub zigbee2mqtt_base_topic: String,
    pub ha_base_url: Option<String>,
    pub ha_token: Option<String>,
    pub ha_timeout_seconds: u64,
    pub zwavejs_ws_url: Option<String>,
    pub timer_tick_interval_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let data_root_value = env_string("ALARM_DATA_ROOT", DEFAULT_DATA_ROOT);
        let data_root = PathBuf::from(data_root_value);
        if data_root.as_os_str().is_empty() {
            anyhow::bail!("ALARM_DATA_ROOT resolved to an empty path");
        }
        let system_config_default = data_root.join("system_config.json");
        let system_config_path = env_optional_string("ALARM_SYSTEM_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or(system_config_default);

        Ok(Self {
            data_root,
            system_config_path,
            mqtt_host: env_optional_string("ALARM_MQTT_HOST"),
            mqtt_port: env_u16("ALARM_MQTT_PORT", 1883),
            mqtt_username: env_optional_string("ALARM_MQTT_USERNAME"),
            mqtt_password: env_optional_string("ALARM_MQTT_PASSWORD"),
            zigbee2mqtt_base_topic: env_string("ALARM_ZIGBEE2MQTT_BASE_TOPIC", "zigbee2mqtt"),
            ha_base_url: env_optional_string("ALARM_HA_BASE_URL"),
            ha_token: env_optional_string("ALARM_HA_TOKEN"),
            ha_timeout_seconds: env_u64("ALARM_HA_TIMEOUT_SECONDS", 10).clamp(1, 120),
            zwavejs_ws_url: env_optional_string("ALARM_ZWAVEJS_WS_URL"),
            timer_tick_interval_seconds: env_u64("ALARM_TIMER_TICK_INTERVAL_SECONDS", 1).max(1),
            cleanup_interval_seconds: env_u64("ALARM_CLEANUP_INTERVAL_SECONDS", 3600).max(60),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
