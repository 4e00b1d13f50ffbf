use crate::config_file::{AppConfig, AuthMode};
use crate::consts::{
    CONNECT_RETRY_SECS, DEVICE_TELEMETRY_TOPIC, GATEWAY_TELEMETRY_TOPIC, MQTT_CHANNEL_CAPACITY,
    MQTT_KEEPALIVE_TIME, MQTT_PUBLISH_TIMEOUT_SECS,
};
use crate::errors::ForwarderError;
use crate::forwarder::{TelemetryPublisher, TelemetryRecord};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAuth {
    Token(String),
    UsernamePassword { username: String, password: String },
    Anonymous,
}

/// Auth decision table, evaluated once before the first connect attempt.
pub fn resolve_auth(cfg: &AppConfig) -> Result<ResolvedAuth, ForwarderError> {
    match cfg.auth_mode {
        AuthMode::Device => match &cfg.access_token {
            Some(token) => {
                info!("Using device token authentication");
                Ok(ResolvedAuth::Token(token.clone()))
            }
            None => Err(ForwarderError::Config(
                "auth_mode=device requires access_token".to_string(),
            )),
        },
        AuthMode::Gateway => match &cfg.username {
            Some(username) => {
                info!("Using gateway MQTT authentication (username={username})");
                Ok(ResolvedAuth::UsernamePassword {
                    username: username.clone(),
                    password: cfg.password.clone().unwrap_or_default(),
                })
            }
            None => {
                warn!("auth_mode=gateway without username - connecting anonymously.");
                Ok(ResolvedAuth::Anonymous)
            }
        },
        AuthMode::Anonymous => {
            info!("Using anonymous MQTT connection");
            Ok(ResolvedAuth::Anonymous)
        }
    }
}

/// Device mode publishes per-device; every other mode goes through the
/// shared gateway topic with the device identity in the payload.
pub fn topic_for(auth_mode: AuthMode) -> &'static str {
    match auth_mode {
        AuthMode::Device => DEVICE_TELEMETRY_TOPIC,
        AuthMode::Gateway | AuthMode::Anonymous => GATEWAY_TELEMETRY_TOPIC,
    }
}

pub struct MqttConnection {
    pub client: AsyncClient,
}

impl MqttConnection {
    /// Blocks until a broker session is established, retrying forever with
    /// a fixed backoff.
    pub async fn connect(cfg: &AppConfig, auth: &ResolvedAuth) -> MqttConnection {
        let client_id = cfg
            .client_id
            .clone()
            .unwrap_or_else(|| "sds011-forwarder".to_string());
        let mut opts = MqttOptions::new(client_id, cfg.gateway_host.clone(), cfg.gateway_port);
        opts.set_keep_alive(Duration::from_secs(MQTT_KEEPALIVE_TIME));
        match auth {
            ResolvedAuth::Token(token) => {
                opts.set_credentials(token.clone(), "");
            }
            ResolvedAuth::UsernamePassword { username, password } => {
                opts.set_credentials(username.clone(), password.clone());
            }
            ResolvedAuth::Anonymous => {}
        }

        let (client, mut event_loop) = AsyncClient::new(opts, MQTT_CHANNEL_CAPACITY);
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!(
                        "Connected to MQTT broker at {}:{}",
                        cfg.gateway_host, cfg.gateway_port
                    );
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connect failed: {e}");
                    sleep(Duration::from_secs(CONNECT_RETRY_SECS)).await;
                }
            }
        }

        tokio::spawn(mqtt_event_loop(event_loop));

        MqttConnection { client }
    }

    /// Ends the session once the caller is done publishing; the event-loop
    /// task drains pending requests up to the disconnect and then stops.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {e}");
        }
    }
}

/// Drives the rumqttc event loop: keepalive, acks, and transparent
/// reconnects with the same fixed backoff. Runs until a disconnect request
/// goes out on the wire.
async fn mqtt_event_loop(mut event_loop: EventLoop) {
    let mut dlq: Vec<u16> = vec![];
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(i)) => match i {
                Incoming::ConnAck(_ca) => {
                    info!("MQTT connection re-established.");
                }
                Incoming::PubAck(pa) => {
                    debug!("Incoming PubAck for pkid {}", pa.pkid);
                    dlq.retain(|x| *x != pa.pkid);
                }
                Incoming::PingResp => {
                    trace!("Recv MQTT PONG");
                }
                Incoming::Disconnect => {
                    error!("mqtt disconnect packet received.");
                }
                _ => {
                    debug!("mqtt incoming packet: {:#?}", i);
                }
            },
            Ok(Event::Outgoing(o)) => match o {
                Outgoing::PingReq => {
                    trace!("Sent MQTT PING");
                }
                Outgoing::Publish(pb) => {
                    dlq.push(pb);
                }
                Outgoing::Disconnect => {
                    info!("MQTT disconnect sent, stopping event loop");
                    return;
                }
                _ => {
                    debug!("outgoing mqtt packet: {:#?}", o);
                }
            },
            Err(e) => {
                error!("MQTT connection lost: {e}");
                sleep(Duration::from_secs(CONNECT_RETRY_SECS)).await;
            }
        }
        if !dlq.is_empty() {
            trace!("unacked publishes: {}", dlq.len());
        }
    }
}

impl TelemetryPublisher for MqttConnection {
    async fn publish(&self, topic: &str, record: &TelemetryRecord) -> Result<(), ForwarderError> {
        let payload = serde_json::to_vec(record)
            .map_err(|e| ForwarderError::Publish(format!("serialize failed: {e}")))?;
        match timeout(
            Duration::from_secs(MQTT_PUBLISH_TIMEOUT_SECS),
            self.client.publish(topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ForwarderError::Publish(format!("{e}"))),
            Err(_e) => Err(ForwarderError::Publish("publish timed out".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(auth_mode: AuthMode) -> AppConfig {
        AppConfig {
            log_level: None,
            serial_port: "/dev/ttyUSB0".to_string(),
            device_name: "DustSensor01".to_string(),
            device_profile: "AirQualitySensor_SDS011".to_string(),
            gateway_host: "localhost".to_string(),
            gateway_port: 1883,
            auth_mode,
            access_token: None,
            username: None,
            password: None,
            client_id: None,
        }
    }

    #[test]
    fn device_mode_without_token_is_fatal() {
        let cfg = config(AuthMode::Device);
        assert!(resolve_auth(&cfg).is_err());
    }

    #[test]
    fn device_mode_with_token_uses_it() {
        let mut cfg = config(AuthMode::Device);
        cfg.access_token = Some("tb-token".to_string());
        assert_eq!(
            resolve_auth(&cfg).unwrap(),
            ResolvedAuth::Token("tb-token".to_string())
        );
    }

    #[test]
    fn gateway_mode_without_username_degrades_to_anonymous() {
        let cfg = config(AuthMode::Gateway);
        assert_eq!(resolve_auth(&cfg).unwrap(), ResolvedAuth::Anonymous);
    }

    #[test]
    fn gateway_mode_password_is_optional() {
        let mut cfg = config(AuthMode::Gateway);
        cfg.username = Some("gw".to_string());
        assert_eq!(
            resolve_auth(&cfg).unwrap(),
            ResolvedAuth::UsernamePassword {
                username: "gw".to_string(),
                password: String::new(),
            }
        );
    }

    #[test]
    fn topic_follows_auth_mode() {
        assert_eq!(topic_for(AuthMode::Device), "v1/devices/me/telemetry");
        assert_eq!(topic_for(AuthMode::Gateway), "v1/gateway/telemetry");
        assert_eq!(topic_for(AuthMode::Anonymous), "v1/gateway/telemetry");
    }

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn record() -> TelemetryRecord {
        TelemetryRecord {
            device_name: "DustSensor01".to_string(),
            device_profile: "AirQualitySensor_SDS011".to_string(),
            timestamp: 0,
            pm25: 12.0,
            pm10: 20.0,
            aqi: 50.0,
            aqi_pm25: 50.0,
            aqi_pm10: 19.0,
        }
    }

    fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    // Accepts one session: reads the CONNECT, answers with a v4 CONNACK,
    // then collects bytes until `topic_hits` publishes have shown up.
    async fn serve_session(mut sock: TcpStream, topic_hits: usize) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let n = sock.read(&mut buf).await.unwrap();
        assert!(n > 0, "expected a CONNECT packet");
        sock.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let topic = GATEWAY_TELEMETRY_TOPIC.as_bytes();
        let mut received = Vec::new();
        while count_occurrences(&received, topic) < topic_hits {
            let n = timeout(Duration::from_secs(10), sock.read(&mut buf))
                .await
                .expect("broker stub timed out waiting for publish")
                .unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    }

    #[tokio::test]
    async fn connect_retries_until_broker_accepts_then_reuses_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            // refuse the first two attempts by closing immediately
            for _ in 0..2 {
                let (sock, _) = listener.accept().await.unwrap();
                drop(sock);
            }
            let (sock, _) = listener.accept().await.unwrap();
            serve_session(sock, 2).await
        });

        let mut cfg = config(AuthMode::Anonymous);
        cfg.gateway_host = "127.0.0.1".to_string();
        cfg.gateway_port = port;

        let conn = MqttConnection::connect(&cfg, &ResolvedAuth::Anonymous).await;
        conn.publish(GATEWAY_TELEMETRY_TOPIC, &record()).await.unwrap();
        conn.publish(GATEWAY_TELEMETRY_TOPIC, &record()).await.unwrap();

        // both publishes arrive on the third accepted socket
        let received = broker.await.unwrap();
        assert_eq!(
            count_occurrences(&received, GATEWAY_TELEMETRY_TOPIC.as_bytes()),
            2
        );
    }

    #[tokio::test]
    async fn publish_after_shutdown_flag_still_reaches_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            serve_session(sock, 1).await
        });

        let mut cfg = config(AuthMode::Anonymous);
        cfg.gateway_host = "127.0.0.1".to_string();
        cfg.gateway_port = port;

        let conn = MqttConnection::connect(&cfg, &ResolvedAuth::Anonymous).await;
        // the event loop keeps draining even after shutdown is requested
        let _ = crate::SHUTDOWN.set(true);
        conn.publish(GATEWAY_TELEMETRY_TOPIC, &record()).await.unwrap();

        let received = broker.await.unwrap();
        assert_eq!(
            count_occurrences(&received, GATEWAY_TELEMETRY_TOPIC.as_bytes()),
            1
        );
        conn.disconnect().await;
    }
}
