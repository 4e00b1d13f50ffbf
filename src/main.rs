mod aqi;
mod config_file;
mod consts;
mod errors;
mod forwarder;
mod mqtt_connection;
mod sensor;

#[macro_use]
extern crate tracing;

use anyhow::Context;
use crate::config_file::AppConfig;
use crate::forwarder::ForwarderContext;
use crate::mqtt_connection::{resolve_auth, topic_for, MqttConnection, ResolvedAuth};
use crate::sensor::Sds011Reader;
use lazy_static::lazy_static;
use tokio::sync::OnceCell;
use tracing_subscriber::filter::EnvFilter;

lazy_static! {
    static ref SHUTDOWN: OnceCell<bool> = OnceCell::new();
    static ref SETTINGS: OnceCell<AppConfig> = OnceCell::new();
}

// Everything allowed to terminate the process happens here, before the
// first connect attempt.
fn startup(cfg: &AppConfig) -> anyhow::Result<(ResolvedAuth, Sds011Reader)> {
    let auth = resolve_auth(cfg)?;
    let reader =
        Sds011Reader::open(&cfg.serial_port).context("Failed to open SDS011 sensor")?;
    info!("SDS011 reader initialized successfully");
    Ok((auth, reader))
}

#[tokio::main]
async fn main() {
    {
        let cfg_file =
            std::env::var("CONFIG_FILE_PATH").unwrap_or_else(|_e| "./config.yaml".to_string());
        let config = AppConfig::from_file(cfg_file);
        SETTINGS.set(config).expect("Couldn't force config into oncecell");
    }

    let cfg = SETTINGS.get().unwrap().clone();

    let mut filter = EnvFilter::from_default_env();
    if cfg.log_level.is_some() {
        filter = filter.add_directive(
            cfg.log_level
                .clone()
                .unwrap()
                .parse()
                .expect("invalid value for log_level"),
        );
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
    info!("Starting SDS011 air quality forwarder");
    info!("Serial port: {}", cfg.serial_port);
    info!("Auth mode: {:?}", cfg.auth_mode);

    ctrlc::set_handler(|| {
        let _ = SHUTDOWN.set(true);
    })
    .expect("Couldn't install shutdown handler");

    let (auth, reader) = match startup(&cfg) {
        Ok(v) => v,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };
    let topic = topic_for(cfg.auth_mode);

    let connection = MqttConnection::connect(&cfg, &auth).await;

    let ctx = ForwarderContext {
        device_name: cfg.device_name.clone(),
        device_profile: cfg.device_profile.clone(),
        topic,
    };
    forwarder::run_loop(reader, &connection, ctx).await;
    connection.disconnect().await;
    info!("shut down cleanly");
}
