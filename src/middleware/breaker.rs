//! Circuit breaker: short-circuits calls to a provider that keeps failing.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::WormholeError;
use crate::middleware::{
    AudioHandler, EmbeddingsHandler, Handler, ImageHandler, Middleware, StreamHandler,
    StructuredHandler, TextHandler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Calls pass; a success resets the failure counter.
    Closed,
    /// Calls short-circuit until the cooldown elapses.
    Open,
    /// One probe call is in flight; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-instance breaker shared across every call through the wrapped
/// handler, all six capabilities included: a text failure opens the
/// breaker for embeddings too, which is the point: the provider is down.
pub struct CircuitBreakerMiddleware {
    threshold: u32,
    cooldown: Duration,
    shared: Arc<Mutex<BreakerState>>,
}

impl CircuitBreakerMiddleware {
    /// `threshold` consecutive failures open the breaker; after `cooldown`
    /// one probe call is admitted.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            shared: Arc::new(Mutex::new(BreakerState {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
        }
    }

    fn wrap<Req, Resp>(&self, next: Handler<Req, Resp>) -> Handler<Req, Resp>
    where
        Req: Send + 'static,
        Resp: 'static,
    {
        let shared = Arc::clone(&self.shared);
        let threshold = self.threshold;
        let cooldown = self.cooldown;

        Arc::new(move |req: Req| {
            let shared = Arc::clone(&shared);
            let next = Arc::clone(&next);
            Box::pin(async move {
                {
                    let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                    match state.state {
                        State::Closed => {}
                        State::Open => {
                            let cooled = state
                                .opened_at
                                .map(|t| t.elapsed() >= cooldown)
                                .unwrap_or(true);
                            if cooled {
                                state.state = State::HalfOpen;
                                state.probe_in_flight = true;
                            } else {
                                return Err(short_circuit());
                            }
                        }
                        State::HalfOpen => {
                            if state.probe_in_flight {
                                return Err(short_circuit());
                            }
                            state.probe_in_flight = true;
                        }
                    }
                }

                let result = next(req).await;

                let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                match &result {
                    Ok(_) => {
                        state.state = State::Closed;
                        state.consecutive_failures = 0;
                        state.opened_at = None;
                        state.probe_in_flight = false;
                    }
                    Err(_) => {
                        if state.state == State::HalfOpen {
                            // Failed probe: back to open, cooldown restarts.
                            state.state = State::Open;
                            state.opened_at = Some(Instant::now());
                            state.probe_in_flight = false;
                        } else {
                            state.consecutive_failures += 1;
                            if state.consecutive_failures >= threshold {
                                state.state = State::Open;
                                state.opened_at = Some(Instant::now());
                                tracing::warn!(
                                    failures = state.consecutive_failures,
                                    "circuit breaker opened"
                                );
                            }
                        }
                    }
                }
                result
            })
        })
    }
}

fn short_circuit() -> WormholeError {
    WormholeError::provider("provider unavailable: circuit breaker is open").with_retryable(true)
}

impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        self.wrap(next)
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        self.wrap(next)
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        self.wrap(next)
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        self.wrap(next)
    }

    fn wrap_audio(&self, next: AudioHandler) -> AudioHandler {
        self.wrap(next)
    }

    fn wrap_image(&self, next: ImageHandler) -> ImageHandler {
        self.wrap(next)
    }
}
