/*!
Test Harness pour la passerelle

Fait tourner un `Bridge` complet sur un `ScriptedSerial` et un `MockMqttClient` :
- Configuration du comportement (topic, QoS, politique de lecture invalide)
- Assertions sur les payloads publiés
- Attente de messages pour les tests d'arrêt
*/

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use fillsense_bridge::config::{BehaviourConfig, QosLevel};
use fillsense_bridge::{Bridge, BridgeError, InvalidReadingPolicy, RunSummary, SerialLines};
use serde_json::Value;

use crate::mqtt_stub::MockMqttClient;
use crate::serial_stub::ScriptedSerial;

/// Harness de test complet pour la passerelle
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    pub config: BehaviourConfig,
    report_idle: bool,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::builder().is_test(true).try_init().ok(); // Init logging pour tests

        Self {
            mqtt_client: MockMqttClient::new(),
            config: BehaviourConfig {
                startup_delay_ms: 0,
                ..BehaviourConfig::default()
            },
            report_idle: false,
        }
    }

    pub fn with_policy(mut self, policy: InvalidReadingPolicy) -> Self {
        self.config.invalid_reading = policy;
        self
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.config.topic = topic.to_string();
        self
    }

    pub fn with_qos(mut self, qos: QosLevel) -> Self {
        self.config.qos = qos;
        self
    }

    /// Forward serial timeouts to the loop, as with a configured read timeout
    pub fn with_idle_reports(mut self) -> Self {
        self.report_idle = true;
        self
    }

    /// Run the bridge over `serial` until the script ends
    pub async fn run(&self, serial: ScriptedSerial) -> Result<RunSummary, BridgeError> {
        self.run_until(serial, std::future::pending()).await
    }

    /// Run the bridge over `serial` until `shutdown` resolves or the script ends
    pub async fn run_until<F>(&self, serial: ScriptedSerial, shutdown: F) -> Result<RunSummary, BridgeError>
    where
        F: Future<Output = ()>,
    {
        let lines = SerialLines::spawn(serial, self.report_idle)?;
        Bridge::new(&self.config, lines, self.mqtt_client.clone())
            .serve(shutdown)
            .await
    }

    /// Run over plain lines
    pub async fn run_lines(&self, lines: &[&str]) -> Result<RunSummary, BridgeError> {
        self.run(ScriptedSerial::new().lines(lines)).await
    }

    /// Payloads publiés sur le topic configuré, dans l'ordre
    pub fn payloads(&self) -> Result<Vec<Value>> {
        self.mqtt_client
            .find_messages_by_topic(&self.config.topic)
            .iter()
            .map(|msg| serde_json::from_slice(&msg.payload).map_err(Into::into))
            .collect()
    }

    /// Payloads bruts (texte JSON) sur le topic configuré
    pub fn raw_payloads(&self) -> Vec<String> {
        self.mqtt_client
            .find_messages_by_topic(&self.config.topic)
            .iter()
            .map(|msg| String::from_utf8_lossy(&msg.payload).into_owned())
            .collect()
    }

    /// Attend qu'au moins `count` messages soient publiés
    pub async fn wait_for_messages(&self, count: usize, timeout_ms: u64) -> Result<()> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.mqtt_client.message_count() >= count {
                log::info!("✅ Received {} expected messages", count);
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        log::warn!("⏰ Timeout waiting for {} messages", count);
        anyhow::bail!(
            "expected {} messages, got {}",
            count,
            self.mqtt_client.message_count()
        );
    }

    /// Assert qu'un message spécifique a été publié
    pub fn assert_message_sent(&self, expected_payload: &Value) -> Result<()> {
        if self.payloads()?.iter().any(|payload| payload == expected_payload) {
            log::info!("✅ Found expected message on {}", self.config.topic);
            return Ok(());
        }

        anyhow::bail!("Expected message not found on topic: {}", self.config.topic);
    }

    /// Assert qu'un champ du dernier message a une valeur spécifique
    pub fn assert_field_equals(&self, field_path: &str, expected: &Value) -> Result<()> {
        let topic = &self.config.topic;
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    log::info!("✅ Field '{}' = {:?} in {}", field_path, expected, topic);
                    return Ok(());
                } else {
                    anyhow::bail!("Field '{}' mismatch: expected {:?}, got {:?}",
                                 field_path, expected, actual);
                }
            }
        }

        anyhow::bail!("Field '{}' not found for comparison in {}", field_path, topic);
    }

    /// Reset le harness pour un nouveau test
    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        log::info!("🧹 Test harness reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        match current {
            Value::Object(obj) => {
                current = obj.get(part)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new();

        let summary = harness
            .run_lines(&["{'fullness': 350, 'meta': {'id': 'tank1'}}"])
            .await
            .unwrap();
        assert_eq!(summary.stats.published, 1);

        harness
            .assert_message_sent(&json!({"fullness": 62.5, "meta": {"id": "tank1"}}))
            .unwrap();
        harness.assert_field_equals("meta.id", &json!("tank1")).unwrap();
        assert!(harness.assert_field_equals("meta.missing", &json!(1)).is_err());
        assert!(harness.mqtt_client.is_closed());

        harness.reset();
        assert!(harness.payloads().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_messages_times_out() {
        let harness = TestHarness::new();
        assert!(harness.wait_for_messages(1, 50).await.is_err());
    }

    #[test]
    fn test_nested_field() {
        let value = json!({"a": {"b": 2}});
        assert_eq!(get_nested_field(&value, "a.b"), Some(&json!(2)));
        assert_eq!(get_nested_field(&value, "a.c"), None);
        assert_eq!(get_nested_field(&value, "a.b.c"), None);
    }
}
