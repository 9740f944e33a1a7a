/*!
Mock MQTT pour tester la publication sans broker

Enregistre chaque message publié, consultable par topic pour les assertions.
*/

use anyhow::Result;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock de rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published: Arc<Mutex<Vec<MockMessage>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Même signature que AsyncClient::publish
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        log::info!("📤 [MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published.lock().push(message);
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Dernier message d'un topic, parsé en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last) => Ok(Some(serde_json::from_slice(&last.payload)?)),
            None => Ok(None),
        }
    }
}
