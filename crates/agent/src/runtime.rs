use std::sync::Arc;
use std::time::Duration;

use demopilot_actions::{ActionContext, ActionRegistry, RunState, SessionControl};
use demopilot_core::protocol::{EventSink, ProtocolEvent};
use demopilot_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use demopilot_core::{AgentLimits, Error, Result};
use demopilot_providers::Provider;
use tracing::{debug, info, warn};

use crate::phase::{Phase, TaskConfig};

const SYSTEM_PROMPT: &str = "You are a browser automation agent. You operate a live web page and \
accomplish the task you are given by calling the available actions. Observe the page, decide on \
one action at a time, and act. Only communicate results through the report actions; plain text \
replies are not delivered to anyone. When the task is done, or when a report action tells you to \
end the execution, respond without calling any action.";

/// Runs an ordered list of phases against one shared browser session.
/// Phases execute strictly in sequence; the session is released on every
/// exit path.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: ActionRegistry,
    limits: AgentLimits,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, registry: ActionRegistry, limits: AgentLimits) -> Self {
        Self {
            provider,
            registry,
            limits,
        }
    }

    /// Run every phase in order, then release the session. Returns the
    /// terminal event, if one was emitted.
    pub async fn run_task<S>(
        &self,
        task: &TaskConfig,
        session: Arc<S>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Option<ProtocolEvent>>
    where
        S: SessionControl + 'static,
    {
        let state = Arc::new(RunState::new());
        let ctx = ActionContext {
            page: session.clone(),
            sink,
            state: state.clone(),
        };

        let outcome = self.run_phases(task, &ctx).await;
        // Teardown runs before the error propagates so the session is
        // released on every exit path.
        session.close().await;
        outcome?;

        Ok(state.terminal())
    }

    async fn run_phases(&self, task: &TaskConfig, ctx: &ActionContext) -> Result<()> {
        for phase in &task.phases {
            if ctx.state.is_terminal() {
                info!(phase = %phase.name, "Terminal event already emitted, skipping phase");
                continue;
            }
            info!(phase = %phase.name, "Running phase");
            self.run_phase(phase, ctx).await?;
        }
        Ok(())
    }

    /// The think/act loop: observe, pick an action, execute, repeat, bounded
    /// by the configured step budget.
    async fn run_phase(&self, phase: &Phase, ctx: &ActionContext) -> Result<()> {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(&phase.task),
        ];
        let tools = self.registry.schemas();

        for step in 0..self.limits.max_steps {
            debug!(step, phase = %phase.name, "Agent step");

            let response = self.chat_with_retry(&messages, &tools).await?;

            if response.tool_calls.is_empty() {
                debug!(phase = %phase.name, "No action requested, phase complete");
                return Ok(());
            }

            let mut assistant = ChatMessage::assistant(response.content.as_deref().unwrap_or(""));
            assistant.tool_calls = Some(response.tool_calls.clone());
            messages.push(assistant);

            for call in &response.tool_calls {
                let result_text = self.dispatch(call, ctx).await;
                let mut tool_msg = ChatMessage::tool_result(&call.id, &result_text);
                tool_msg.name = Some(call.name.clone());
                messages.push(tool_msg);
            }

            // Hard contract: once a terminal event is out, this phase is
            // over regardless of what the model would do next.
            if ctx.state.is_terminal() {
                info!(phase = %phase.name, "Terminal event emitted, ending phase");
                return Ok(());
            }
        }

        warn!(phase = %phase.name, max_steps = self.limits.max_steps, "Step budget exhausted");
        Ok(())
    }

    /// Execute one action call. Failures are fed back into the agent's
    /// reasoning loop as a failed attempt so it can retry with corrected
    /// arguments; they never crash the host process.
    async fn dispatch(&self, call: &ToolCallRequest, ctx: &ActionContext) -> String {
        match self
            .registry
            .invoke(&call.name, ctx.clone(), call.arguments.clone())
            .await
        {
            Ok(outcome) if outcome.include_in_memory => outcome.content.to_string(),
            Ok(_) => "ok".to_string(),
            Err(e) => format!("Error: {}", e),
        }
    }

    async fn chat_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<LLMResponse> {
        let mut last_error = None;

        for attempt in 0..=self.limits.llm_max_retries {
            if attempt > 0 {
                let delay_ms = self.limits.llm_retry_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, delay_ms, "Retrying LLM call after transient error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self.provider.chat(messages, tools).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, "LLM call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Provider("LLM call failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use demopilot_actions::PageHandle;
    use demopilot_core::protocol::BufferSink;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider double that replays a scripted sequence of responses. Once
    /// the script is exhausted it answers with plain text (no tool calls).
    struct ScriptedProvider {
        turns: Mutex<VecDeque<LLMResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<LLMResponse>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, _messages: &[ChatMessage], _tools: &[Value]) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.turns.lock().unwrap().pop_front().unwrap_or_else(|| {
                LLMResponse {
                    content: Some("done".to_string()),
                    ..Default::default()
                }
            }))
        }
    }

    fn action_turn(name: &str, arguments: Value) -> LLMResponse {
        LLMResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: format!("call_{}", name),
                name: name.to_string(),
                arguments,
            }],
            finish_reason: "tool_calls".to_string(),
        }
    }

    /// Session double with a release counter.
    #[derive(Default)]
    struct MockSession {
        url: Mutex<String>,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl PageHandle for MockSession {
        async fn current_url(&self) -> Result<String> {
            Ok(self.url.lock().unwrap().clone())
        }

        async fn goto(&self, url: &str) -> Result<()> {
            *self.url.lock().unwrap() = url.to_string();
            Ok(())
        }

        async fn wait_until_loaded(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SessionControl for MockSession {
        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn profile(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::new(
            provider,
            ActionRegistry::with_builtins(),
            AgentLimits {
                llm_retry_delay_ms: 1,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_session_released_without_phases() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig {
            profile: profile(&[]),
            website_url: "https://example.com".to_string(),
            phases: vec![],
        };

        let terminal = orchestrator(provider.clone())
            .run_task(&task, session.clone(), sink)
            .await
            .unwrap();

        assert!(terminal.is_none());
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_fields_run_emits_only_required_fields() {
        // Opener navigates; booker reports missing fields.
        let provider = Arc::new(ScriptedProvider::new(vec![
            action_turn("open_webpage", json!({"website_url": "https://example.com"})),
            LLMResponse {
                content: Some("opened".to_string()),
                ..Default::default()
            },
            action_turn(
                "report_required_fields",
                json!({"requiredFields": [{"field_name": "name"}]}),
            ),
        ]));
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig::demo_booking(profile(&[("email", "a@b.com")]), "https://example.com");
        let terminal = orchestrator(provider.clone())
            .run_task(&task, session.clone(), sink.clone())
            .await
            .unwrap();

        assert!(matches!(terminal, Some(ProtocolEvent::RequiredFields(_))));
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("requiredFields"));
        assert!(!lines.iter().any(|l| l.contains(r#""result""#)));
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complete_profile_run_emits_only_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            LLMResponse {
                content: Some("opened".to_string()),
                ..Default::default()
            },
            action_turn(
                "report_outcome",
                json!({
                    "success": true,
                    "scheduled_time": "2025-03-30 10:00:00",
                    "message": "Demo scheduled"
                }),
            ),
        ]));
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig::demo_booking(
            profile(&[("email", "a@b.com"), ("name", "Ada")]),
            "https://example.com",
        );
        let terminal = orchestrator(provider)
            .run_task(&task, session, sink.clone())
            .await
            .unwrap();

        match terminal {
            Some(ProtocolEvent::Result(outcome)) => assert!(outcome.success),
            other => panic!("expected result event, got {:?}", other),
        }
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(!lines.iter().any(|l| l.contains("requiredFields")));
    }

    #[tokio::test]
    async fn test_terminal_event_short_circuits_remaining_phases() {
        // The first phase reports missing fields; the scripted booker turn
        // must never be consulted.
        let provider = Arc::new(ScriptedProvider::new(vec![
            action_turn(
                "report_required_fields",
                json!({"requiredFields": [{"field_name": "email"}]}),
            ),
            action_turn(
                "report_outcome",
                json!({"success": true, "scheduled_time": "t", "message": "m"}),
            ),
        ]));
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig::demo_booking(profile(&[]), "https://example.com");
        let terminal = orchestrator(provider.clone())
            .run_task(&task, session, sink.clone())
            .await
            .unwrap();

        assert!(matches!(terminal, Some(ProtocolEvent::RequiredFields(_))));
        assert_eq!(sink.lines().len(), 1);
        // One call for the opener phase; the booker phase was skipped.
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_feed_back_and_emit_nothing() {
        let provider = Arc::new(ScriptedProvider::new(vec![action_turn(
            "report_outcome",
            json!({"success": "yes", "scheduled_time": "t", "message": "m"}),
        )]));
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig {
            profile: profile(&[]),
            website_url: "https://example.com".to_string(),
            phases: vec![Phase::new("booker", "book it".to_string())],
        };
        let terminal = orchestrator(provider.clone())
            .run_task(&task, session, sink.clone())
            .await
            .unwrap();

        // Validation failure: no protocol line, no terminal state; the agent
        // got the error back and finished with a plain reply.
        assert!(terminal.is_none());
        assert!(sink.lines().is_empty());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_step_budget_bounds_the_loop() {
        // A model that navigates forever must be stopped by the budget.
        let turns: Vec<LLMResponse> = (0..50)
            .map(|i| {
                action_turn(
                    "open_webpage",
                    json!({"website_url": format!("https://example.com/{}", i)}),
                )
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(turns));
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig {
            profile: profile(&[]),
            website_url: "https://example.com".to_string(),
            phases: vec![Phase::new("opener", "open pages".to_string())],
        };
        let orchestrator = Orchestrator::new(
            provider.clone(),
            ActionRegistry::with_builtins(),
            AgentLimits {
                max_steps: 5,
                llm_retry_delay_ms: 1,
                ..Default::default()
            },
        );
        orchestrator.run_task(&task, session, sink).await.unwrap();

        assert_eq!(provider.call_count(), 5);
    }

    #[tokio::test]
    async fn test_provider_errors_are_retried_then_propagated() {
        struct FailingProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Provider for FailingProvider {
            async fn chat(&self, _m: &[ChatMessage], _t: &[Value]) -> Result<LLMResponse> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Provider("boom".to_string()))
            }
        }

        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let session = Arc::new(MockSession::default());
        let sink = Arc::new(BufferSink::new());

        let task = TaskConfig {
            profile: profile(&[]),
            website_url: "https://example.com".to_string(),
            phases: vec![Phase::new("opener", "open".to_string())],
        };
        let orchestrator = Orchestrator::new(
            provider.clone(),
            ActionRegistry::with_builtins(),
            AgentLimits {
                llm_max_retries: 2,
                llm_retry_delay_ms: 1,
                ..Default::default()
            },
        );
        let err = orchestrator
            .run_task(&task, session.clone(), sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        // The session is released even on the failure path.
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }
}
