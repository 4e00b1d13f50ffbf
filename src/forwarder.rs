use crate::aqi;
use crate::consts::{ERROR_BACKOFF_SECS, STEADY_INTERVAL_SECS};
use crate::errors::ForwarderError;
use crate::sensor::SensorAdapter;
use crate::SHUTDOWN;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    #[serde(rename = "deviceName")]
    pub device_name: String,
    #[serde(rename = "deviceProfile")]
    pub device_profile: String,
    pub timestamp: u64,
    pub pm25: f64,
    pub pm10: f64,
    pub aqi: f64,
    pub aqi_pm25: f64,
    pub aqi_pm10: f64,
}

/// Minimal publish seam between the loop and the broker session.
#[allow(async_fn_in_trait)]
pub trait TelemetryPublisher {
    async fn publish(&self, topic: &str, record: &TelemetryRecord) -> Result<(), ForwarderError>;
}

#[derive(Debug, Clone)]
pub struct ForwarderContext {
    pub device_name: String,
    pub device_profile: String,
    pub topic: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Published,
    EmptyRead,
    Faulted,
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One pass of the acquisition loop: read, score, stamp, publish. Every
/// failure is absorbed into an outcome.
pub async fn run_iteration<S: SensorAdapter, P: TelemetryPublisher>(
    sensor: &mut S,
    publisher: &P,
    ctx: &ForwarderContext,
) -> IterationOutcome {
    let measurement = match sensor.read() {
        Ok(Some(m)) => m,
        Ok(None) => {
            warn!("No data returned from SDS011 sensor");
            return IterationOutcome::EmptyRead;
        }
        Err(e) => {
            error!("Error in main loop: {e}");
            return IterationOutcome::Faulted;
        }
    };
    debug!(
        "sensor read pm2.5={} pm10={} at {:?}",
        measurement.pm25, measurement.pm10, measurement.captured_at
    );

    let index = match aqi::compute(&measurement) {
        Ok(idx) => idx,
        Err(e) => {
            error!("Error in main loop: {e}");
            return IterationOutcome::Faulted;
        }
    };

    let record = TelemetryRecord {
        device_name: ctx.device_name.clone(),
        device_profile: ctx.device_profile.clone(),
        timestamp: timestamp_millis(),
        pm25: measurement.pm25,
        pm10: measurement.pm10,
        aqi: index.combined,
        aqi_pm25: index.pm25,
        aqi_pm10: index.pm10,
    };

    match publisher.publish(ctx.topic, &record).await {
        Ok(()) => {
            info!("Telemetry sent: {record:?}");
            IterationOutcome::Published
        }
        Err(e) => {
            error!("Error in main loop: {e}");
            IterationOutcome::Faulted
        }
    }
}

/// The long-running acquisition loop; runs until the shutdown flag is set.
pub async fn run_loop<S: SensorAdapter, P: TelemetryPublisher>(
    mut sensor: S,
    publisher: &P,
    ctx: ForwarderContext,
) {
    info!("Using telemetry topic: {}", ctx.topic);
    loop {
        if SHUTDOWN.initialized() {
            info!("Shutdown requested, stopping acquisition loop");
            return;
        }
        let secs = match run_iteration(&mut sensor, publisher, &ctx).await {
            IterationOutcome::Published => STEADY_INTERVAL_SECS,
            IterationOutcome::EmptyRead | IterationOutcome::Faulted => ERROR_BACKOFF_SECS,
        };
        sleep(Duration::from_secs(secs)).await;
    }
}
