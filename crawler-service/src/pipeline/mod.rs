use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

/// A payload plus where and when it was acquired.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
    /// Attempt index within the tick that produced the payload (1-based).
    pub attempt: u32,
    /// Proxy URL the payload was fetched through, if any.
    pub via: Option<String>,
}

impl<T> Envelope<T> {
    pub fn new(payload: T, attempt: u32, via: Option<String>) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
            attempt,
            via,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<T>: Send + Sync {
    async fn apply(&self, input: Envelope<T>) -> Result<Envelope<T>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Wires one source through a chain of transforms into a sink.
///
/// `run` returns once the source stream ends and the sink has drained it.
pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T>>>,
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + 'static,
    K: Sink<T> + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        for t in self.transforms {
            stream = Box::pin(stream.then(move |item| {
                let t = t.clone();
                async move {
                    match item {
                        Ok(env) => t.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        tracing::debug!("pipeline started");
        let res = self.sink.run(stream).await;
        tracing::info!(ok = res.is_ok(), "pipeline finished");
        res
    }
}
