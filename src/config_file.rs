use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Gateway,
    Device,
    Anonymous,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log_level: Option<String>,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_device_profile")]
    pub device_profile: String,
    #[serde(default = "default_gateway_host")]
    pub gateway_host: String,
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    pub access_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_device_name() -> String {
    "DustSensor01".to_string()
}
fn default_device_profile() -> String {
    "AirQualitySensor_SDS011".to_string()
}
fn default_gateway_host() -> String {
    "mqtt-broker".to_string()
}
fn default_gateway_port() -> u16 {
    1883
}
fn default_auth_mode() -> AuthMode {
    AuthMode::Gateway
}

impl AppConfig {
    pub fn from_file(cfg_file: String) -> Self {
        let yaml = fs::read_to_string(cfg_file).expect("Could not read config file");
        let cfg: AppConfig = serde_yaml::from_str(&yaml).expect("Config parse error");
        cfg
    }
}
