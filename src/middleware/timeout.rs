//! Deadline middleware: bounds each call, and for streams both the open and
//! every inter-chunk gap.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::error::WormholeError;
use crate::middleware::{
    AudioHandler, EmbeddingsHandler, Handler, ImageHandler, Middleware, StreamHandler,
    StructuredHandler, TextHandler,
};
use crate::request::ChunkStream;

/// Fails calls that exceed a wall-clock budget with a typed timeout error.
///
/// Non-streaming calls get one deadline for the whole handler. Streaming
/// calls get the deadline on the stream open and again on every gap between
/// chunks; when a gap expires the stream yields one timeout error and then
/// closes.
pub struct TimeoutMiddleware {
    duration: Duration,
}

impl TimeoutMiddleware {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    fn wrap<Req, Resp>(&self, next: Handler<Req, Resp>) -> Handler<Req, Resp>
    where
        Req: Send + 'static,
        Resp: 'static,
    {
        let duration = self.duration;
        Arc::new(move |req: Req| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                match tokio::time::timeout(duration, next(req)).await {
                    Ok(result) => result,
                    Err(_) => Err(deadline_error(duration)),
                }
            })
        })
    }
}

fn deadline_error(duration: Duration) -> WormholeError {
    WormholeError::timeout(format!("deadline of {duration:?} elapsed"))
}

/// Re-arms `duration` for every chunk; on expiry emits one timeout error
/// and ends the stream, which closes the channel.
fn guard_gaps(stream: ChunkStream, duration: Duration) -> ChunkStream {
    let timed = tokio_stream::StreamExt::timeout(stream, duration);
    let fused = timed
        .map(move |item| match item {
            Ok(inner) => inner,
            Err(_elapsed) => Err(deadline_error(duration)),
        })
        .scan(false, |errored, item| {
            if *errored {
                return futures::future::ready(None);
            }
            if item.is_err() {
                *errored = true;
            }
            futures::future::ready(Some(item))
        });
    Box::pin(fused)
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &str {
        "timeout"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        self.wrap(next)
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        let duration = self.duration;
        let open_guard: StreamHandler = self.wrap(next);
        Arc::new(move |req| {
            let open_guard = Arc::clone(&open_guard);
            Box::pin(async move {
                let stream = open_guard(req).await?;
                Ok(guard_gaps(stream, duration))
            })
        })
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
