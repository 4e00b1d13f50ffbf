use thiserror::Error;

#[derive(Error, Clone, Debug)]
pub enum ForwarderError {
    #[error("invalid AQI input: {0}")]
    InvalidInput(String),
    #[error("sensor error: {0}")]
    Sensor(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("config error: {0}")]
    Config(String),
}
