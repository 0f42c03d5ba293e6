/**
 * DÉCOUVERTE - Hosts vus up/down sur le réseau
 *
 * RÔLE :
 * Transforme un flux d'événements externes en sightings dans le registre.
 * Les hosts déjà enregistrés sont ignorés (leur santé vient des diagnostics).
 *
 * SOURCE PAR DÉFAUT : abonnement MQTT sur `byop/discovery@v1`,
 * payload `{"host": "192.168.1.97", "event": "up" | "down"}`.
 */

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::registry::DeviceRegistry;
use crate::state::SharedRegistry;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Up(String),
    Down(String),
}

impl DiscoveryEvent {
    pub fn apply(&self, registry: &mut DeviceRegistry) {
        match self {
            DiscoveryEvent::Up(host) => registry.mark_device_up(host),
            DiscoveryEvent::Down(host) => registry.mark_device_down(host),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid discovery JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown discovery event {0:?}")]
    UnknownEvent(String),
    #[error("empty host")]
    EmptyHost,
}

#[derive(Debug, Deserialize)]
struct DiscoveryMessage {
    host: String,
    event: String,
}

pub fn parse_message(payload: &[u8]) -> Result<DiscoveryEvent, DiscoveryError> {
    let msg: DiscoveryMessage = serde_json::from_slice(payload)?;
    let host = msg.host.trim().to_string();
    if host.is_empty() {
        return Err(DiscoveryError::EmptyHost);
    }
    match msg.event.as_str() {
        "up" => Ok(DiscoveryEvent::Up(host)),
        "down" => Ok(DiscoveryEvent::Down(host)),
        other => Err(DiscoveryError::UnknownEvent(other.to_string())),
    }
}

/// Applies events from any in-process feed until every sender is dropped.
pub fn spawn_event_loop(registry: SharedRegistry, mut events: mpsc::Receiver<DiscoveryEvent>) -> JoinHandle<()> {
    task::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("discovery: {event:?}");
            event.apply(&mut registry.lock());
        }
    })
}

/// Abonnement MQTT, réabonné à chaque (re)connexion.
pub fn spawn_mqtt_discovery(conf: MqttConf, registry: SharedRegistry, health: HealthTracker) -> JoinHandle<()> {
    health.mark_discovery_connecting();
    task::spawn(async move {
        let mut opts = MqttOptions::new("byop-kernel-discovery", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        info!("discovery: connecting to mqtt://{}:{} ({})", conf.host, conf.port, conf.topic);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_discovery_connected();
                    if let Err(e) = client.subscribe(&conf.topic, QoS::AtLeastOnce).await {
                        warn!("discovery: subscribe failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == conf.topic => match parse_message(&p.payload) {
                    Ok(event) => {
                        debug!("discovery: {event:?}");
                        event.apply(&mut registry.lock());
                    }
                    Err(e) => warn!("discovery: {e}"),
                },
                Ok(_) => {}
                Err(e) => {
                    warn!("discovery: MQTT error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::RainbowSource;
    use crate::listener::TelemetryListener;
    use crate::registry::FieldMode;
    use crate::state::new_state;
    use crate::store::MemoryStore;

    #[test]
    fn test_parse_messages() {
        assert_eq!(
            parse_message(br#"{"host": "192.168.1.97", "event": "up"}"#).unwrap(),
            DiscoveryEvent::Up("192.168.1.97".into())
        );
        assert_eq!(
            parse_message(br#"{"host": " wled-a ", "event": "down", "extra": 1}"#).unwrap(),
            DiscoveryEvent::Down("wled-a".into())
        );
        assert!(matches!(
            parse_message(br#"{"host": "h", "event": "sideways"}"#),
            Err(DiscoveryError::UnknownEvent(_))
        ));
        assert!(matches!(parse_message(br#"{"host": "", "event": "up"}"#), Err(DiscoveryError::EmptyHost)));
        assert!(matches!(parse_message(b"not json"), Err(DiscoveryError::Json(_))));
    }

    #[tokio::test]
    async fn test_event_loop_feeds_registry() {
        let registry = new_state(DeviceRegistry::new(
            FieldMode::Dynamic,
            Box::new(RainbowSource::new()),
            Box::new(TelemetryListener::new()),
            Box::new(MemoryStore::new()),
        ));
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_event_loop(registry.clone(), rx);

        tx.send(DiscoveryEvent::Up("10.0.0.9".into())).await.unwrap();
        tx.send(DiscoveryEvent::Down("10.0.0.10".into())).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let registry = registry.lock();
        let seen = registry.unregistered_devices();
        assert!(seen["10.0.0.9"].up);
        assert!(!seen["10.0.0.10"].up);
    }
}
