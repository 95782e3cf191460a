/*!
Mock MQTT Client pour tests sans broker

Implémente `TelemetrySink` : enregistre chaque publication (topic, QoS, payload)
et permet de simuler une file de requêtes fermée pour tester les erreurs fatales.
*/

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use fillsense_bridge::{BridgeError, TelemetrySink};
use parking_lot::Mutex;
use rumqttc::{ClientError, Publish, QoS, Request};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Mock MQTT client standing in for `MqttSession`
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    /// Publishes accepted before every publish fails
    fail_after: Arc<Mutex<Option<usize>>>,
    attempts: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            fail_after: Arc::new(Mutex::new(None)),
            attempts: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept `count` publishes, then fail like a dead rumqttc request queue
    pub fn fail_after(&self, count: usize) {
        *self.fail_after.lock() = Some(count);
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Payloads publiés, parsés en JSON, dans l'ordre
    pub fn get_json_payloads(&self) -> Result<Vec<Value>> {
        self.published_messages
            .lock()
            .iter()
            .map(|msg| serde_json::from_slice(&msg.payload).map_err(Into::into))
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    pub fn message_count(&self) -> usize {
        self.published_messages.lock().len()
    }

    /// `close` was called at least once
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().clear();
        *self.fail_after.lock() = None;
        self.attempts.store(0, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySink for MockMqttClient {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), BridgeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if matches!(*self.fail_after.lock(), Some(limit) if attempt >= limit) {
            log::info!("📤 [MOCK] Rejecting publish to {}", topic);
            let request = Request::Publish(Publish::new(topic, qos, payload));
            return Err(ClientError::Request(request).into());
        }

        log::info!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        self.published_messages.lock().push(MockMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        self.closed.store(true, Ordering::SeqCst);
        log::info!("🔌 [MOCK] Session closed");
        Ok(())
    }
}

/// Construit des lignes au format du capteur (`{'fullness': 350, 'id': 'tank1'}`)
#[derive(Debug, Clone, Default)]
pub struct SensorLineBuilder {
    fields: Vec<(String, Value)>,
}

impl SensorLineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ligne avec seulement `fullness`
    pub fn reading<V: Into<Value>>(fullness: V) -> Self {
        Self::new().field("fullness", fullness)
    }

    pub fn field<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Rendu avec apostrophes, sans terminaison de ligne
    pub fn build(&self) -> String {
        let body = self
            .fields
            .iter()
            .map(|(key, value)| {
                let value = serde_json::to_string(value)
                    .unwrap_or_default()
                    .replace('"', "'");
                format!("'{}': {}", key, value)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", body)
    }
}
