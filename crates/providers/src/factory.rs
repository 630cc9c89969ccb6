use std::sync::Arc;

use demopilot_core::Config;

use crate::{OpenAIProvider, Provider};

/// Build the chat provider from resolved configuration. The credential
/// contract pins this process to one OpenAI-compatible endpoint, so no
/// provider inference is needed.
pub fn create_provider(config: &Config) -> Arc<dyn Provider> {
    Arc::new(OpenAIProvider::new(&config.provider))
}
