//! Deterministic stand-in for the real orchestrator.
//!
//! Simulates a run against the same inputs: a few progress lines on stdout
//! with an artificial delay between them (so streaming consumers are
//! exercised), then exactly one canned protocol event through the same
//! emitter the real path uses. Parent-process parsers can be tested against
//! this without a browser or a model.

use std::time::Duration;

use demopilot_core::protocol::{EventSink, ProtocolEvent, RequiredField};
use demopilot_core::Result;
use serde_json::{Map, Value};
use tracing::debug;

pub struct MockRunner {
    pub steps: u32,
    pub delay: Duration,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            steps: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl MockRunner {
    pub fn new(steps: u32, delay: Duration) -> Self {
        Self { steps, delay }
    }

    pub async fn run(
        &self,
        profile: &Map<String, Value>,
        website_url: &str,
        sink: &dyn EventSink,
    ) -> Result<()> {
        let profile_json = Value::Object(profile.clone());

        for step in 0..self.steps {
            println!("Mocking {} on {}", profile_json, website_url);
            debug!(step, "Mock progress");
            tokio::time::sleep(self.delay).await;
        }

        sink.emit(&ProtocolEvent::RequiredFields(vec![
            RequiredField::new("email"),
            RequiredField::new("name"),
        ]))
    }
}
