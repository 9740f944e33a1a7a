/*!
Test Harness AtmoSmart

Regroupe le mock MQTT et, à la demande, un stub de fournisseur HTTP :
- expectations sur le nombre de messages par topic
- assertions sur les champs du dernier message JSON
*/

use crate::mqtt_stub::MockMqttClient;
use crate::provider_stub::ProviderStub;
use anyhow::Result;
use serde_json::Value;

pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    pub provider: Option<ProviderStub>,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            mqtt_client: MockMqttClient::new(),
            provider: None,
            expectations: Vec::new(),
        }
    }

    /// Démarre un stub de fournisseur HTTP
    pub async fn with_provider(mut self) -> Result<Self> {
        self.provider = Some(ProviderStub::start().await?);
        Ok(self)
    }

    pub fn provider(&self) -> Result<&ProviderStub> {
        self.provider
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no provider stub started, call with_provider()"))
    }

    /// On s'attend à exactement `count` messages sur `topic`
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    pub async fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual = self.mqtt_client.find_messages_by_topic(&expectation.topic).len();
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual
                );
            }
            log::info!("✅ Topic '{}': {} messages as expected", expectation.topic, actual);
        }
        Ok(())
    }

    /// `field_path` en notation pointée, ex. `metrics.0.status`
    pub fn assert_field_equals(
        &self,
        topic: &str,
        field_path: &str,
        expected: &Value,
    ) -> Result<()> {
        let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("No message on {}", topic);
        };
        match get_nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!(
                "Field '{}' not found in latest message on {}",
                field_path,
                topic
            ),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(obj) => obj.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
