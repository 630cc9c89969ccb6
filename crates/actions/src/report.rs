use async_trait::async_trait;
use demopilot_core::protocol::{Outcome, ProtocolEvent, RequiredField};
use demopilot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::{Action, ActionContext, ActionOutcome, ActionSchema};

/// Reports the profile fields the workflow needs but does not have.
/// Emitting this ends the run: the orchestrator starts no further phases
/// and the task instructions tell the agent to stop.
pub struct ReportRequiredFieldsAction;

#[async_trait]
impl Action for ReportRequiredFieldsAction {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "report_required_fields",
            description: "Output required fields to book a demo. Call this when the profile is missing fields the booking form requires, then end the execution.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "requiredFields": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "field_name": { "type": "string" }
                            },
                            "required": ["field_name"]
                        },
                        "description": "Names of the missing fields, in form order"
                    }
                },
                "required": ["requiredFields"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let fields = params
            .get("requiredFields")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                Error::Validation("Missing required parameter: requiredFields".to_string())
            })?;
        for entry in fields {
            if entry.get("field_name").and_then(|v| v.as_str()).is_none() {
                return Err(Error::Validation(
                    "Each entry in requiredFields must be an object with a string 'field_name'"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, params: Value) -> Result<ActionOutcome> {
        let fields: Vec<RequiredField> = params["requiredFields"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|e| e.get("field_name").and_then(|v| v.as_str()))
            .map(RequiredField::new)
            .collect();

        info!(count = fields.len(), "Reporting required fields");
        let event = ProtocolEvent::RequiredFields(fields);
        ctx.sink.emit(&event)?;
        ctx.state.mark_terminal(event);

        Ok(ActionOutcome::retained(json!({
            "status": "reported",
            "note": "Required fields reported to the caller. Do not fill the form; end the execution."
        })))
    }
}

/// Reports the terminal outcome of the booking workflow.
pub struct ReportOutcomeAction;

#[async_trait]
impl Action for ReportOutcomeAction {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "report_outcome",
            description: "Output the result of booking a demo. Call this after the booking is complete, before ending the execution; without it the caller never learns the demo was booked.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "success": {
                        "type": "boolean",
                        "description": "Whether the demo was booked"
                    },
                    "scheduled_time": {
                        "type": "string",
                        "description": "The confirmed demo time as shown on the page"
                    },
                    "message": {
                        "type": "string",
                        "description": "Human-readable confirmation message"
                    }
                },
                "required": ["success", "scheduled_time", "message"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("success").and_then(|v| v.as_bool()).is_none() {
            return Err(Error::Validation(
                "Parameter 'success' must be a boolean".to_string(),
            ));
        }
        if params.get("scheduled_time").and_then(|v| v.as_str()).is_none() {
            return Err(Error::Validation(
                "Parameter 'scheduled_time' must be a string".to_string(),
            ));
        }
        if params.get("message").and_then(|v| v.as_str()).is_none() {
            return Err(Error::Validation(
                "Parameter 'message' must be a string".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, params: Value) -> Result<ActionOutcome> {
        // validate() ran before execute(); the shapes hold here.
        let outcome = Outcome {
            success: params["success"].as_bool().unwrap(),
            scheduled_time: params["scheduled_time"].as_str().unwrap().to_string(),
            message: params["message"].as_str().unwrap().to_string(),
        };

        info!(success = outcome.success, scheduled_time = %outcome.scheduled_time, "Reporting outcome");
        let event = ProtocolEvent::Result(outcome);
        ctx.sink.emit(&event)?;
        ctx.state.mark_terminal(event);

        Ok(ActionOutcome::retained(json!({
            "status": "reported",
            "note": "Outcome reported to the caller. End the execution."
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;

    #[tokio::test]
    async fn test_report_required_fields_emits_one_line() {
        let action = ReportRequiredFieldsAction;
        let (ctx, _page, sink) = test_context();
        let params = json!({
            "requiredFields": [
                {"field_name": "email"},
                {"field_name": "name"}
            ]
        });
        action.validate(&params).unwrap();
        let outcome = action.execute(ctx.clone(), params).await.unwrap();

        assert!(outcome.include_in_memory);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            r#">>>{"requiredFields": [{"field_name": "email"}, {"field_name": "name"}]}"#
        );
        assert!(ctx.state.is_terminal());
    }

    #[tokio::test]
    async fn test_report_required_fields_rejects_bad_entries() {
        let action = ReportRequiredFieldsAction;
        assert!(action.validate(&json!({})).is_err());
        assert!(action.validate(&json!({"requiredFields": "email"})).is_err());
        assert!(action
            .validate(&json!({"requiredFields": [{"field_name": 42}]}))
            .is_err());
        assert!(action.validate(&json!({"requiredFields": []})).is_ok());
    }

    #[tokio::test]
    async fn test_report_outcome_emits_result_event() {
        let action = ReportOutcomeAction;
        let (ctx, _page, sink) = test_context();
        let params = json!({
            "success": true,
            "scheduled_time": "2025-03-30 10:00:00",
            "message": "Demo scheduled"
        });
        action.validate(&params).unwrap();
        action.execute(ctx.clone(), params).await.unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(r#">>>{"result": {"success": true"#));
        assert!(matches!(
            ctx.state.terminal(),
            Some(ProtocolEvent::Result(_))
        ));
    }

    #[test]
    fn test_report_outcome_rejects_mistyped_success() {
        let action = ReportOutcomeAction;
        let err = action
            .validate(&json!({
                "success": "true",
                "scheduled_time": "t",
                "message": "m"
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_first_terminal_event_wins() {
        let (ctx, _page, sink) = test_context();

        ReportRequiredFieldsAction
            .execute(ctx.clone(), json!({"requiredFields": [{"field_name": "email"}]}))
            .await
            .unwrap();
        ReportOutcomeAction
            .execute(
                ctx.clone(),
                json!({"success": true, "scheduled_time": "t", "message": "m"}),
            )
            .await
            .unwrap();

        // Both invocations emit, but the authoritative result stays the first.
        assert_eq!(sink.lines().len(), 2);
        assert!(matches!(
            ctx.state.terminal(),
            Some(ProtocolEvent::RequiredFields(_))
        ));
    }
}
