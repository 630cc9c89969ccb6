pub mod navigate;
pub mod registry;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use demopilot_core::protocol::{EventSink, ProtocolEvent};
use demopilot_core::Result;
use serde_json::Value;

pub use registry::ActionRegistry;

/// Access to the shared browsing context's active page, abstracted so actions
/// can run against a test double. The browser crate provides the CDP-backed
/// implementation.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn current_url(&self) -> Result<String>;
    /// Start navigating to `url`. Returns once navigation is underway.
    async fn goto(&self, url: &str) -> Result<()>;
    /// Block until the page reaches a stable load state.
    async fn wait_until_loaded(&self) -> Result<()>;
}

/// A page whose owning browser session can be torn down. The orchestrator
/// releases the session through this on every exit path.
#[async_trait]
pub trait SessionControl: PageHandle {
    /// Release the underlying browser handle. Must be safe to call once per
    /// session; implementations guard against double release.
    async fn close(&self);
}

/// Terminal state of one run. The first report action latches its event
/// here; the orchestrator refuses further phases once it is set.
#[derive(Default)]
pub struct RunState {
    terminal: Mutex<Option<ProtocolEvent>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// First event wins: a later report must not overwrite the authoritative
    /// result of the run.
    pub fn mark_terminal(&self, event: ProtocolEvent) {
        let mut slot = self.terminal.lock().unwrap();
        if slot.is_none() {
            *slot = Some(event);
        }
    }

    pub fn terminal(&self) -> Option<ProtocolEvent> {
        self.terminal.lock().unwrap().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.lock().unwrap().is_some()
    }
}

/// Handles threaded into every action invocation. Constructed once per run;
/// no process-wide state.
#[derive(Clone)]
pub struct ActionContext {
    pub page: Arc<dyn PageHandle>,
    pub sink: Arc<dyn EventSink>,
    pub state: Arc<RunState>,
}

pub struct ActionSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Result of one action invocation. `include_in_memory` controls whether the
/// full content is retained in the agent transcript; side-effect-only
/// actions return a short ack instead of bloating context.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub content: Value,
    pub include_in_memory: bool,
}

impl ActionOutcome {
    pub fn retained(content: Value) -> Self {
        Self {
            content,
            include_in_memory: true,
        }
    }

    pub fn ephemeral(content: Value) -> Self {
        Self {
            content,
            include_in_memory: false,
        }
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn schema(&self) -> ActionSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ActionContext, params: Value) -> Result<ActionOutcome>;
}
