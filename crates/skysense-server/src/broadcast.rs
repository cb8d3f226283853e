use std::sync::Arc;

use tracing::warn;

use skysense_shared::protocol::SensorReading;

use crate::registry::SessionRegistry;
use crate::telemetry::TelemetrySink;

/// Fans a reading out to every live sensor session and the telemetry sink.
#[derive(Clone)]
pub struct SensorBroadcaster {
    sessions: SessionRegistry,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl SensorBroadcaster {
    pub fn new(sessions: SessionRegistry, telemetry: Option<Arc<dyn TelemetrySink>>) -> Self {
        Self {
            sessions,
            telemetry,
        }
    }

    /// Push `reading` to all sensor sessions, then to telemetry. Returns the
    /// number of sessions that accepted it.
    pub async fn publish(&self, reading: &SensorReading) -> usize {
        let payload = match reading.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode sensor reading");
                return 0;
            }
        };

        let reached = self.sessions.broadcast_all(&payload).await;

        if let Some(sink) = &self.telemetry {
            sink.publish(&payload);
        }

        reached
    }
}

#[cfg(test)]
mod tests {
    use skysense_shared::types::ChannelKind;

    use super::*;
    use crate::telemetry::RecordingSink;

    fn reading() -> SensorReading {
        SensorReading {
            temperature: Some(21.0),
            humidity: Some(50.0),
            wind_speed: None,
            wind_direction: None,
            rain_rate: Some(0.0),
            light: None,
            timestamp: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_sessions_and_telemetry() {
        let sessions = SessionRegistry::new(ChannelKind::Sensor);
        let (_a, mut rx_a) = sessions.register_anonymous().await;
        let (_b, mut rx_b) = sessions.register_anonymous().await;
        let sink = Arc::new(RecordingSink::default());

        let broadcaster =
            SensorBroadcaster::new(sessions, Some(sink.clone() as Arc<dyn TelemetrySink>));
        assert_eq!(broadcaster.publish(&reading()).await, 2);

        let expected = reading().to_json().unwrap();
        assert_eq!(rx_a.recv().await, Some(expected.clone()));
        assert_eq!(rx_b.recv().await, Some(expected.clone()));
        assert_eq!(sink.published(), vec![expected]);
    }

    #[tokio::test]
    async fn test_publish_without_viewers_or_sink() {
        let broadcaster = SensorBroadcaster::new(SessionRegistry::new(ChannelKind::Sensor), None);
        assert_eq!(broadcaster.publish(&reading()).await, 0);
    }
}
