/*!
# AtmoSmart DevKit - Stubs et utilitaires de test

Bibliothèque de test pour le kernel AtmoSmart :
- Stub MQTT pour vérifier les événements publiés sans broker
- Stub HTTP pour simuler le fournisseur de télémétrie et le backend de synthèse vocale
- Harness regroupant les deux
*/

pub mod mqtt_stub;
pub mod provider_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockMqttClient};
pub use provider_stub::{ChannelFeedBuilder, ProviderStub, StubResponse};
pub use test_utils::TestHarness;
