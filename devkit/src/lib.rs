/*!
# Fillsense DevKit - Stubs et utilitaires de test

Bibliothèque facilitant les tests de la passerelle sans matériel ni broker:
- Stub MQTT qui enregistre les publications
- Port série scripté (lignes, timeouts, erreurs)
- Builder de lignes au format du capteur
- Harness qui fait tourner le pont complet
*/

pub mod mqtt_stub;
pub mod serial_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMqttClient, SensorLineBuilder};
pub use serial_stub::ScriptedSerial;
pub use test_utils::TestHarness;
