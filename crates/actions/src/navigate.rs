use async_trait::async_trait;
use demopilot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::{Action, ActionContext, ActionOutcome, ActionSchema};

/// Navigates the shared context's active page. Idempotent: a no-op when the
/// page is already at the target URL, so repeated calls perform at most one
/// navigation and load wait.
pub struct OpenWebpageAction {
    retries: u32,
}

impl OpenWebpageAction {
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }
}

impl Default for OpenWebpageAction {
    fn default() -> Self {
        Self { retries: 2 }
    }
}

#[async_trait]
impl Action for OpenWebpageAction {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "open_webpage",
            description: "Webpage: Open a specific webpage",
            parameters: json!({
                "type": "object",
                "properties": {
                    "website_url": {
                        "type": "string",
                        "description": "Absolute URL of the webpage to open"
                    }
                },
                "required": ["website_url"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let url = params
            .get("website_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::Validation("Missing required parameter: website_url".to_string())
            })?;
        Url::parse(url).map_err(|e| Error::Validation(format!("Invalid website_url: {}", e)))?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, params: Value) -> Result<ActionOutcome> {
        let url = params["website_url"].as_str().unwrap();

        if ctx.page.current_url().await? == url {
            debug!(url, "Page already at target URL, skipping navigation");
            return Ok(ActionOutcome::ephemeral(json!({
                "status": "already_open",
                "url": url
            })));
        }

        let mut attempt = 0;
        loop {
            ctx.page.goto(url).await?;
            match ctx.page.wait_until_loaded().await {
                Ok(()) => break,
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(url, attempt, error = %e, "Page load failed, retrying navigation");
                }
                Err(e) => return Err(e),
            }
        }

        info!(url, "Opened webpage");
        Ok(ActionOutcome::ephemeral(json!({
            "status": "opened",
            "url": url
        })))
    }
}
