//! End-to-end pipeline behavior: middleware composition, retries, the
//! breaker, caching, the registry gate, and the tool-calling agent loop.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use common::{MockTurn, mock_client, mock_client_with, text_response, tool_call_response};
use serde_json::json;
use wormhole::{
    CacheMiddleware, Capability, CircuitBreakerMiddleware, ErrorCode, Middleware, ModelInfo,
    ModelRegistry, RetryMiddleware, RetryPolicy, Role, TextHandler, ToolCall, ToolSafetyConfig,
    WormholeError, tool,
};

#[tokio::test]
async fn test_rate_limit_retry_honors_retry_after() {
    let rate_limited = || {
        MockTurn::Error(
            WormholeError::rate_limit("slow down")
                .with_status(429)
                .with_retry_after(Duration::from_millis(50)),
        )
    };
    let (client, provider) = mock_client_with(
        vec![rate_limited(), rate_limited(), MockTurn::Text(text_response("ok"))],
        |builder| {
            builder.middleware(RetryMiddleware::new(
                RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100))
                    .with_jitter(0.0),
            ))
        },
    );

    let start = Instant::now();
    let response = client
        .text()
        .model("m")
        .prompt("hi")
        .generate()
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.text, "ok");
    assert_eq!(provider.text_call_count(), 3);
    assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(300), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_non_retryable_error_stops_after_one_call() {
    let (client, provider) = mock_client_with(
        vec![MockTurn::Error(WormholeError::auth("bad key"))],
        |builder| builder.middleware(RetryMiddleware::new(RetryPolicy::default())),
    );

    let err = client
        .text()
        .model("m")
        .prompt("hi")
        .generate()
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Auth);
    assert_eq!(provider.text_call_count(), 1);
}

#[tokio::test]
async fn test_tool_loop_two_turns() {
    let executions = Arc::new(AtomicU32::new(0));
    let exec_count = Arc::clone(&executions);
    let add = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(move |args| {
            let exec_count = Arc::clone(&exec_count);
            async move {
                exec_count.fetch_add(1, Ordering::SeqCst);
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            }
        });

    let (client, provider) = mock_client_with(
        vec![
            MockTurn::Text(tool_call_response(vec![ToolCall::new(
                "call_1",
                "add",
                json!({"a": 2, "b": 3}),
            )])),
            MockTurn::Text(text_response("5")),
        ],
        |builder| builder.tool(add),
    );

    let response = client
        .text()
        .model("m")
        .prompt("what is 2+3?")
        .generate()
        .await
        .unwrap();

    assert_eq!(response.text, "5");
    assert_eq!(provider.text_call_count(), 2);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // The second request carries the full exchange: the original user turn
    // followed by one assistant/tool pair.
    let second = provider.request(1);
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[0].role, Role::User);
    assert_eq!(second.messages[1].role, Role::Assistant);
    assert_eq!(second.messages[1].tool_calls.len(), 1);
    assert_eq!(second.messages[2].role, Role::Tool);
    assert_eq!(second.messages[2].tool_call_id.as_deref(), Some("call_1"));
    assert!(second.messages[2].content.contains('5'));
}

#[tokio::test]
async fn test_tool_failure_feeds_error_back_to_model() {
    let boom = tool("boom", "Always fails").build(|_| async move {
        Err(WormholeError::unknown("handler exploded"))
    });

    let (client, provider) = mock_client_with(
        vec![
            MockTurn::Text(tool_call_response(vec![ToolCall::new(
                "call_1",
                "boom",
                json!({}),
            )])),
            MockTurn::Text(text_response("the tool failed")),
        ],
        |builder| builder.tool(boom),
    );

    let response = client
        .text()
        .model("m")
        .prompt("try the tool")
        .generate()
        .await
        .unwrap();

    // Tool failures are conversation content, not caller errors.
    assert_eq!(response.text, "the tool failed");
    let second = provider.request(1);
    assert!(second.messages[2].content.contains("error"));
}

#[tokio::test]
async fn test_parallel_tool_execution_bound_and_order() {
    let mut tools = Vec::new();
    for i in 1..=5 {
        let name = format!("t{i}");
        tools.push(tool(&name, "sleep then answer").build(move |_| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!(format!("done {i}")))
        }));
    }

    let calls: Vec<ToolCall> = (1..=5)
        .map(|i| ToolCall::new(format!("call_{i}"), format!("t{i}"), json!({})))
        .collect();

    let (client, provider) = mock_client_with(
        vec![
            MockTurn::Text(tool_call_response(calls)),
            MockTurn::Text(text_response("all done")),
        ],
        |builder| {
            let builder = tools
                .into_iter()
                .fold(builder, |builder, t| builder.tool(t));
            builder.tool_safety(ToolSafetyConfig {
                max_concurrency: 2,
                ..ToolSafetyConfig::default()
            })
        },
    );

    let start = Instant::now();
    let response = client
        .text()
        .model("m")
        .prompt("run them all")
        .generate()
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.text, "all done");
    // Five 50ms tools, two at a time: three waves.
    assert!(elapsed >= Duration::from_millis(125), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");

    // Results return in the model's call order regardless of completion
    // order.
    let second = provider.request(1);
    let tool_messages: Vec<_> = second
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 5);
    for (i, message) in tool_messages.iter().enumerate() {
        assert_eq!(
            message.tool_call_id.as_deref(),
            Some(format!("call_{}", i + 1).as_str())
        );
    }
}

#[tokio::test]
async fn test_agent_loop_exhaustion_returns_last_response() {
    let echo = tool("echo", "Echo").build(|args| async move { Ok(args) });

    // The mock always asks for another tool call; the loop must stop at the
    // iteration cap and hand back the last response.
    let turns: Vec<MockTurn> = (0..10)
        .map(|i| {
            MockTurn::Text(tool_call_response(vec![ToolCall::new(
                format!("call_{i}"),
                "echo",
                json!({}),
            )]))
        })
        .collect();

    let (client, provider) = mock_client_with(turns, |builder| builder.tool(echo));

    let response = client
        .text()
        .model("m")
        .prompt("loop forever")
        .max_iterations(3)
        .generate()
        .await
        .unwrap();

    assert_eq!(provider.text_call_count(), 3);
    assert_eq!(response.tool_calls.len(), 1);
}

#[tokio::test]
async fn test_tools_disabled_skips_agent_loop() {
    let echo = tool("echo", "Echo").build(|args| async move { Ok(args) });
    let (client, provider) = mock_client_with(
        vec![MockTurn::Text(tool_call_response(vec![ToolCall::new(
            "call_1",
            "echo",
            json!({}),
        )]))],
        |builder| builder.tool(echo),
    );

    let response = client
        .text()
        .model("m")
        .prompt("hi")
        .tools_enabled(false)
        .generate()
        .await
        .unwrap();

    // The tool call comes back to the caller untouched.
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(provider.text_call_count(), 1);
    assert!(provider.request(0).tools.is_empty());
}

#[tokio::test]
async fn test_circuit_breaker_end_to_end() {
    let failure = || MockTurn::Error(WormholeError::network("down"));
    let (client, provider) = mock_client_with(
        vec![failure(), failure(), failure(), MockTurn::Text(text_response("back"))],
        |builder| {
            builder.middleware(CircuitBreakerMiddleware::new(3, Duration::from_millis(100)))
        },
    );

    let call = |client: wormhole::Client| async move {
        client.text().model("m").prompt("x").generate().await
    };

    for _ in 0..3 {
        assert!(call(client.clone()).await.is_err());
    }
    assert_eq!(provider.text_call_count(), 3);

    // Open: short-circuits without reaching the provider.
    let err = call(client.clone()).await.unwrap_err();
    assert!(err.to_string().contains("circuit breaker"));
    assert_eq!(provider.text_call_count(), 3);

    // After the cooldown the probe goes through and closes the breaker.
    tokio::time::sleep(Duration::from_millis(110)).await;
    let response = call(client.clone()).await.unwrap();
    assert_eq!(response.text, "back");
    assert_eq!(provider.text_call_count(), 4);
}

#[tokio::test]
async fn test_cache_serves_identical_request_once() {
    let (client, provider) = mock_client_with(
        vec![MockTurn::Text(text_response("cached"))],
        |builder| builder.middleware(CacheMiddleware::new(Duration::from_secs(60), 16)),
    );

    let run = |client: wormhole::Client| async move {
        client
            .text()
            .model("m")
            .prompt("same question")
            .generate()
            .await
            .unwrap()
    };

    let first = run(client.clone()).await;
    let second = run(client.clone()).await;
    assert_eq!(first.text, "cached");
    assert_eq!(first, second);
    assert_eq!(provider.text_call_count(), 1);
}

#[tokio::test]
async fn test_middleware_declaration_order() {
    struct Probe {
        label: &'static str,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Middleware for Probe {
        fn wrap_text(&self, next: TextHandler) -> TextHandler {
            let label = self.label;
            let log = Arc::clone(&self.log);
            Arc::new(move |req| {
                let log = Arc::clone(&log);
                let next = Arc::clone(&next);
                Box::pin(async move {
                    log.lock().unwrap().push(format!("before:{label}"));
                    let resp = next(req).await;
                    log.lock().unwrap().push(format!("after:{label}"));
                    resp
                })
            })
        }
    }

    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (client, _provider) = mock_client_with(
        vec![MockTurn::Text(text_response("ok"))],
        |builder| {
            builder
                .middleware(Probe {
                    label: "outer",
                    log: Arc::clone(&log),
                })
                .middleware(Probe {
                    label: "inner",
                    log: Arc::clone(&log),
                })
        },
    );

    client
        .text()
        .model("m")
        .prompt("hi")
        .generate()
        .await
        .unwrap();

    let observed = log.lock().unwrap().clone();
    assert_eq!(
        observed,
        vec!["before:outer", "before:inner", "after:inner", "after:outer"]
    );
}

fn registry_with_pinned_model() -> Arc<ModelRegistry> {
    let registry = Arc::new(ModelRegistry::new());
    registry.register(
        ModelInfo::new("pinned-model", "mock")
            .context_length(8192)
            .capabilities([Capability::Text, Capability::Stream])
            .constraint("temperature", json!(1.0)),
    );
    registry.register(
        ModelInfo::new("retired-model", "mock")
            .capabilities([Capability::Text])
            .deprecated(),
    );
    registry
}

#[tokio::test]
async fn test_registry_gate_and_constraints() {
    let provider_turns = vec![MockTurn::Text(text_response("ok"))];
    let provider = common::MockProvider::new(provider_turns);
    let factory_provider = Arc::clone(&provider);
    let client = wormhole::Client::builder()
        .provider(
            "mock",
            Arc::new(move |_| Ok(Arc::clone(&factory_provider) as Arc<dyn wormhole::Provider>)),
            wormhole::ProviderConfig::new(), // registry validation ON
        )
        .model_registry(registry_with_pinned_model())
        .build()
        .unwrap();

    // Unknown model.
    let err = client
        .text()
        .model("ghost-model")
        .prompt("hi")
        .generate()
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Model);

    // Deprecated model.
    let err = client
        .text()
        .model("retired-model")
        .prompt("hi")
        .generate()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deprecated"));

    // Known model: the pinned temperature overwrites the caller's value.
    client
        .text()
        .model("pinned-model")
        .prompt("hi")
        .temperature(0.2)
        .generate()
        .await
        .unwrap();
    assert_eq!(provider.request(0).temperature, Some(1.0));
}

#[tokio::test]
async fn test_embeddings_order_preserved() {
    let (client, provider) = mock_client(vec![MockTurn::Embeddings(
        wormhole::EmbeddingsResponse {
            embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            usage: None,
            model: "mock-model".into(),
        },
    )]);

    let response = client
        .embeddings()
        .model("mock-model")
        .input("first")
        .input("second")
        .generate()
        .await
        .unwrap();

    assert_eq!(response.embeddings.len(), 2);
    assert_eq!(response.embeddings[0], vec![0.1, 0.2]);
    assert_eq!(provider.embeddings_calls.load(Ordering::SeqCst), 1);
}
