//! Republishing of sensor readings to an external message bus.
//!
//! Publishing is fire-and-forget: a sink never blocks the caller and never
//! reports failure back, it only logs.

/// Destination for serialized sensor readings.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, payload: &str);
}

#[cfg(feature = "mqtt")]
pub use mqtt::MqttPublisher;

#[cfg(feature = "mqtt")]
mod mqtt {
    use std::time::Duration;

    use paho_mqtt as paho;
    use tracing::{debug, info, warn};

    use super::TelemetrySink;

    const KEEP_ALIVE: Duration = Duration::from_secs(60);
    const RETRY_DELAY: Duration = Duration::from_secs(3);

    pub struct MqttPublisher {
        client: paho::AsyncClient,
        topic: String,
    }

    impl MqttPublisher {
        /// Create the client and start connecting in the background. The
        /// first connection is retried until it succeeds; after that the
        /// client reconnects on its own.
        pub fn start(broker: &str, topic: &str) -> Result<Self, paho::Error> {
            let client_id = format!("skysense-{}", uuid::Uuid::new_v4().simple());
            let create_opts = paho::CreateOptionsBuilder::new()
                .server_uri(broker)
                .client_id(client_id)
                .finalize();
            let client = paho::AsyncClient::new(create_opts)?;

            let connect_opts = paho::ConnectOptionsBuilder::new()
                .keep_alive_interval(KEEP_ALIVE)
                .clean_session(true)
                .automatic_reconnect(RETRY_DELAY, Duration::from_secs(60))
                .finalize();

            let connector = client.clone();
            let broker = broker.to_string();
            tokio::spawn(async move {
                loop {
                    match connector.connect(connect_opts.clone()).await {
                        Ok(_) => {
                            info!(broker = %broker, "MQTT connected");
                            break;
                        }
                        Err(e) => {
                            warn!(broker = %broker, error = %e, "MQTT connect failed, retrying");
                            tokio::time::sleep(RETRY_DELAY).await;
                        }
                    }
                }
            });

            Ok(Self {
                client,
                topic: topic.to_string(),
            })
        }
    }

    impl TelemetrySink for MqttPublisher {
        fn publish(&self, payload: &str) {
            if !self.client.is_connected() {
                debug!(topic = %self.topic, "MQTT not connected, reading not republished");
                return;
            }

            let message = paho::Message::new(self.topic.as_str(), payload, paho::QOS_0);
            let token = self.client.publish(message);
            let topic = self.topic.clone();
            tokio::spawn(async move {
                if let Err(e) = token.await {
                    warn!(topic = %topic, error = %e, "MQTT publish failed");
                }
            });
        }
    }
}

/// Sink that keeps every payload in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    payloads: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn published(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TelemetrySink for RecordingSink {
    fn publish(&self, payload: &str) {
        self.payloads.lock().unwrap().push(payload.to_string());
    }
}
