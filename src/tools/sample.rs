//! Demonstration tools: a slow string reverser that exercises the
//! progress and cancellation machinery, and a bounded random number
//! generator that exercises application-level rejection.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mcp::handler::{
    get_int_arg, get_string_arg, success_result, ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};

const REVERSE_STEPS: u64 = 5;

/// Reverses a string over several timed steps, reporting progress at each
/// one and honoring cancellation between steps.
pub struct ReverseTool {
    step_delay: Duration,
}

impl Default for ReverseTool {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(1),
        }
    }
}

impl ReverseTool {
    /// Delay between steps; tests use zero to run instantly.
    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl ToolHandler for ReverseTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "reverse_tool".to_string(),
            description: "Reverse a string, slowly, with progress updates".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The string to reverse"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    fn required_scopes(&self) -> Vec<String> {
        vec!["execute".to_string()]
    }

    async fn execute(
        &self,
        arguments: HashMap<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let query = get_string_arg(&arguments, "query")?;

        ctx.ensure_active()?;
        ctx.progress(
            0,
            Some(REVERSE_STEPS),
            Some(format!("Processing step 0/{REVERSE_STEPS}...")),
        )
        .await;

        for step in 1..=REVERSE_STEPS {
            ctx.ensure_active()?;
            tokio::time::sleep(self.step_delay).await;
            ctx.progress(
                step,
                Some(REVERSE_STEPS),
                Some(format!("Processing step {step}/{REVERSE_STEPS}...")),
            )
            .await;
        }

        let reversed: String = query.chars().rev().collect();
        Ok(success_result(
            reversed.clone(),
            Some(json!({ "reversed_query": reversed })),
        ))
    }
}

/// Returns a uniformly random integer in a caller-supplied inclusive
/// range.
pub struct RandomNumberTool;

#[async_trait]
impl ToolHandler for RandomNumberTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "random_number_tool".to_string(),
            description: "Generate a random integer in an inclusive range".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "min": {
                        "type": "integer",
                        "description": "Lower bound (inclusive)"
                    },
                    "max": {
                        "type": "integer",
                        "description": "Upper bound (inclusive)"
                    }
                },
                "required": ["min", "max"]
            }),
        }
    }

    fn required_scopes(&self) -> Vec<String> {
        vec!["execute".to_string()]
    }

    async fn execute(
        &self,
        arguments: HashMap<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        ctx.ensure_active()?;
        let min = get_int_arg(&arguments, "min")?;
        let max = get_int_arg(&arguments, "max")?;

        if min > max {
            return Err(Error::ToolRejected(format!(
                "min ({min}) must not exceed max ({max})"
            )));
        }

        let value = rand::thread_rng().gen_range(min..=max);
        Ok(success_result(
            value.to_string(),
            Some(json!({ "random_number": value })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_reverse_produces_reversed_string() {
        let tool = ReverseTool::with_step_delay(Duration::ZERO);
        let result = tool
            .execute(args(&[("query", json!("abc"))]), ToolContext::detached())
            .await
            .unwrap();

        assert!(!result.is_error);
        assert_eq!(result.content[0].as_text(), Some("cba"));
        assert_eq!(
            result.structured_content,
            Some(json!({ "reversed_query": "cba" }))
        );
    }

    #[tokio::test]
    async fn test_reverse_reports_leading_zero_then_each_step() {
        use crate::mcp::progress::{ProgressReporter, ProgressToken};
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::channel(16);
        let mut ctx = ToolContext::detached();
        ctx.reporter = Some(ProgressReporter::new(
            ProgressToken::String("tok".to_string()),
            tx,
        ));

        let tool = ReverseTool::with_step_delay(Duration::ZERO);
        tool.execute(args(&[("query", json!("hello"))]), ctx)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.total, Some(5));
            seen.push(event.progress);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_reverse_missing_query_is_invalid_arguments() {
        let tool = ReverseTool::with_step_delay(Duration::ZERO);
        let err = tool
            .execute(HashMap::new(), ToolContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToolArguments(_)));
    }

    #[tokio::test]
    async fn test_reverse_stops_when_cancelled() {
        let tool = ReverseTool::with_step_delay(Duration::ZERO);
        let ctx = ToolContext::detached();
        ctx.cancel.cancel();

        let err = tool
            .execute(args(&[("query", json!("abc"))]), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_random_number_within_bounds() {
        let tool = RandomNumberTool;
        for _ in 0..20 {
            let result = tool
                .execute(
                    args(&[("min", json!(3)), ("max", json!(7))]),
                    ToolContext::detached(),
                )
                .await
                .unwrap();
            let value = result.structured_content.unwrap()["random_number"]
                .as_i64()
                .unwrap();
            assert!((3..=7).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_random_number_degenerate_range() {
        let tool = RandomNumberTool;
        let result = tool
            .execute(
                args(&[("min", json!(4)), ("max", json!(4))]),
                ToolContext::detached(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.structured_content,
            Some(json!({ "random_number": 4 }))
        );
    }

    #[tokio::test]
    async fn test_random_number_rejects_inverted_range() {
        let tool = RandomNumberTool;
        let err = tool
            .execute(
                args(&[("min", json!(9)), ("max", json!(2))]),
                ToolContext::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolRejected(_)));
    }

    #[test]
    fn test_register_all_tools() {
        let mut registry = crate::mcp::handler::ToolRegistry::new();
        super::super::register_all_tools(&mut registry);
        assert!(registry.has_tool("reverse_tool"));
        assert!(registry.has_tool("random_number_tool"));
        assert_eq!(registry.tool_count(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_by_registered_names() {
        let mut registry = crate::mcp::handler::ToolRegistry::new();
        registry.register(ReverseTool::with_step_delay(Duration::ZERO));
        registry.register(RandomNumberTool);

        let result = registry
            .dispatch(
                "reverse_tool",
                args(&[("query", json!("abc"))]),
                ToolContext::detached(),
            )
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("cba"));

        let result = registry
            .dispatch(
                "random_number_tool",
                args(&[("min", json!(1)), ("max", json!(1))]),
                ToolContext::detached(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.structured_content,
            Some(json!({ "random_number": 1 }))
        );
    }
}
