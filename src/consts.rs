pub const MQTT_KEEPALIVE_TIME: u64 = 60_u64;
pub const MQTT_CHANNEL_CAPACITY: usize = 32_usize;
pub const MQTT_PUBLISH_TIMEOUT_SECS: u64 = 3_u64;

pub const CONNECT_RETRY_SECS: u64 = 5_u64;
pub const STEADY_INTERVAL_SECS: u64 = 2_u64;
pub const ERROR_BACKOFF_SECS: u64 = 5_u64;

pub const DEVICE_TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
pub const GATEWAY_TELEMETRY_TOPIC: &str = "v1/gateway/telemetry";
