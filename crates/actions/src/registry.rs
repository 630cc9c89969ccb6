use std::collections::HashMap;
use std::sync::Arc;

use demopilot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::navigate::OpenWebpageAction;
use crate::report::{ReportOutcomeAction, ReportRequiredFieldsAction};
use crate::{Action, ActionContext, ActionOutcome};

/// The only sanctioned channel through which the agent can produce
/// observable output or side effects. Arguments are validated against the
/// action's schema before the handler runs.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry with the three built-in actions: navigation plus the two
    /// terminal report actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenWebpageAction::default()));
        registry.register(Arc::new(ReportRequiredFieldsAction));
        registry.register(Arc::new(ReportOutcomeAction));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        let schema = action.schema();
        debug!(name = schema.name, "Registering action");
        self.actions.insert(schema.name.to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    /// Schemas in the chat-completions `tools` envelope.
    pub fn schemas(&self) -> Vec<Value> {
        self.actions
            .values()
            .map(|action| {
                let schema = action.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    /// Validate `params` against the action's schema, then run the handler.
    /// Unknown actions and schema violations are validation errors the agent
    /// loop feeds back to the model as a failed attempt; they never crash
    /// the host process.
    pub async fn invoke(&self, name: &str, ctx: ActionContext, params: Value) -> Result<ActionOutcome> {
        let action = self
            .get(name)
            .ok_or_else(|| Error::Action(format!("Unknown action: {}", name)))?;

        if let Err(e) = action.validate(&params) {
            warn!(action = name, error = %e, "Action validation failed");
            return Err(e);
        }

        debug!(action = name, "Executing action");
        action.execute(ctx, params).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
