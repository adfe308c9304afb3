//! Bounded, order-preserving execution of the tool calls in one model turn.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::message::{ToolCall, ToolResult};
use crate::schema::validate_raw;

use super::ToolRegistry;

/// Safety limits the executor enforces on every batch.
#[derive(Debug, Clone)]
pub struct ToolSafetyConfig {
    /// Upper bound on concurrently running handlers. Excess calls queue in
    /// the order they appear in the model's response.
    pub max_concurrency: usize,
    /// Wall-clock budget per tool call.
    pub tool_timeout: Duration,
    /// Ceiling on the JSON-encoded result size; oversized results become
    /// error results.
    pub max_result_bytes: usize,
    /// Validate argument maps against the tool's declared schema before
    /// invoking the handler.
    pub validate_args: bool,
}

impl Default for ToolSafetyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            tool_timeout: Duration::from_secs(30),
            max_result_bytes: 256 * 1024,
            validate_args: true,
        }
    }
}

/// Runs the tool calls of one assistant turn in parallel under
/// [`ToolSafetyConfig`] limits.
///
/// Results correspond one-to-one with the input calls, in input order. A
/// failing call produces an error [`ToolResult`]; it never cancels its
/// siblings and never surfaces as a caller-visible error.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ToolSafetyConfig,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: ToolSafetyConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ToolSafetyConfig {
        &self.config
    }

    /// Executes `calls` and returns one result per call, in input order.
    ///
    /// Admission is strictly in input order: each task acquires its
    /// concurrency permit before the next task is spawned, so when the pool
    /// is saturated the remaining calls queue deterministically. Dropping
    /// the returned future cancels every pending and in-flight execution.
    pub async fn run(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("executor semaphore closed");
            let call = call.clone();
            let registry = Arc::clone(&self.registry);
            let config = self.config.clone();

            handles.push(tokio::spawn(async move {
                let result = execute_one(&registry, &config, &call).await;
                drop(permit);
                result
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, call) in handles.into_iter().zip(calls) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    results.push(ToolResult::err(
                        &call.id,
                        format!("tool task failed: {join_err}"),
                    ));
                }
            }
        }
        results
    }
}

async fn execute_one(
    registry: &ToolRegistry,
    config: &ToolSafetyConfig,
    call: &ToolCall,
) -> ToolResult {
    let Some(tool) = registry.get(&call.name) else {
        return ToolResult::err(&call.id, format!("tool '{}' is not registered", call.name));
    };

    if config.validate_args {
        if let Err(err) = validate_raw("$", tool.input_schema(), &call.arguments) {
            return ToolResult::err(
                &call.id,
                format!("invalid arguments for '{}': {err}", call.name),
            );
        }
    }

    tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool");

    let outcome = tokio::time::timeout(config.tool_timeout, tool.invoke(call.arguments.clone())).await;

    match outcome {
        Err(_) => ToolResult::err(
            &call.id,
            format!(
                "tool '{}' timed out after {:?}",
                call.name, config.tool_timeout
            ),
        ),
        Ok(Err(err)) => ToolResult::err(&call.id, format!("tool '{}' failed: {err}", call.name)),
        Ok(Ok(value)) => {
            if encoded_len(&value) > config.max_result_bytes {
                ToolResult::err(
                    &call.id,
                    format!(
                        "tool '{}' result exceeds {} bytes",
                        call.name, config.max_result_bytes
                    ),
                )
            } else {
                ToolResult::ok(&call.id, value)
            }
        }
    }
}

fn encoded_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn setup(tools: Vec<crate::tools::Tool>, config: ToolSafetyConfig) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        for t in tools {
            registry.register(t).unwrap();
        }
        ToolExecutor::new(registry, config)
    }

    #[tokio::test]
    async fn test_results_in_input_order() {
        let slow_then_fast = tool("wait", "sleep then echo")
            .param("ms", "integer")
            .param("tag", "string")
            .build(|args| async move {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(args["tag"]))
            });

        let executor = setup(vec![slow_then_fast], ToolSafetyConfig::default());
        let calls = vec![
            ToolCall::new("c1", "wait", json!({"ms": 60, "tag": "first"})),
            ToolCall::new("c2", "wait", json!({"ms": 5, "tag": "second"})),
        ];

        let results = executor.run(&calls).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "c1");
        assert_eq!(results[0].value, Some(json!("first")));
        assert_eq!(results[1].call_id, "c2");
        assert_eq!(results[1].value, Some(json!("second")));
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running_c = Arc::clone(&running);
        let peak_c = Arc::clone(&peak);

        let t = tool("busy", "track concurrency").build(move |_| {
            let running = Arc::clone(&running_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        });

        let executor = setup(
            vec![t],
            ToolSafetyConfig {
                max_concurrency: 2,
                ..ToolSafetyConfig::default()
            },
        );
        let calls: Vec<_> = (0..5)
            .map(|i| ToolCall::new(format!("c{i}"), "busy", json!({})))
            .collect();

        let start = Instant::now();
        let results = executor.run(&calls).await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| !r.is_error()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        // Five 50ms tasks two at a time: three waves.
        assert!(elapsed >= Duration::from_millis(125), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let executor = setup(vec![], ToolSafetyConfig::default());
        let results = executor
            .run(&[ToolCall::new("c1", "ghost", json!({}))])
            .await;
        assert!(results[0].is_error());
        assert!(results[0].error.as_deref().unwrap().contains("not registered"));
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let t = tool("typed", "needs a string")
            .param("q", "string")
            .build(|_| async move { Ok(json!(null)) });
        let executor = setup(vec![t], ToolSafetyConfig::default());

        let results = executor
            .run(&[
                ToolCall::new("c1", "typed", json!({"q": 42})),
                ToolCall::new("c2", "typed", json!({})),
                ToolCall::new("c3", "typed", json!({"q": "ok"})),
            ])
            .await;

        assert!(results[0].is_error());
        assert!(results[1].is_error());
        assert!(!results[2].is_error());
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_result() {
        let t = tool("hang", "never returns").build(|_| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        });
        let executor = setup(
            vec![t],
            ToolSafetyConfig {
                tool_timeout: Duration::from_millis(30),
                ..ToolSafetyConfig::default()
            },
        );

        let results = executor.run(&[ToolCall::new("c1", "hang", json!({}))]).await;
        assert!(results[0].is_error());
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_oversized_result_becomes_error_result() {
        let t = tool("big", "returns a lot").build(|_| async move {
            Ok(json!("x".repeat(1024)))
        });
        let executor = setup(
            vec![t],
            ToolSafetyConfig {
                max_result_bytes: 100,
                ..ToolSafetyConfig::default()
            },
        );

        let results = executor.run(&[ToolCall::new("c1", "big", json!({}))]).await;
        assert!(results[0].is_error());
        assert!(results[0].error.as_deref().unwrap().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_cancel_siblings() {
        let fail = tool("fail", "always errors").build(|_| async move {
            Err(crate::WormholeError::unknown("handler exploded"))
        });
        let ok = tool("ok", "succeeds").build(|_| async move { Ok(json!("fine")) });
        let executor = setup(vec![fail, ok], ToolSafetyConfig::default());

        let results = executor
            .run(&[
                ToolCall::new("c1", "fail", json!({})),
                ToolCall::new("c2", "ok", json!({})),
            ])
            .await;

        assert!(results[0].is_error());
        assert_eq!(results[1].value, Some(json!("fine")));
    }
}
