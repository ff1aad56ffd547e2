use std::sync::Arc;

use futures::StreamExt;
use meter_client::Reading;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    crawler::Crawler,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
};

/// Readings produced by a running `Crawler`.
///
/// Spawning the source starts the crawler's schedule; the stream ends once the
/// crawler stops (shutdown) and every produced reading has been delivered.
pub struct CrawlerSource {
    receiver: tokio::sync::Mutex<Option<mpsc::Receiver<Envelope<Reading>>>>,
}

impl CrawlerSource {
    pub fn spawn(
        crawler: Arc<Crawler>,
        channel_capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let handle = tokio::spawn(crawler.run(tx, shutdown));

        let source = Self {
            receiver: tokio::sync::Mutex::new(Some(rx)),
        };
        (source, handle)
    }
}

#[async_trait::async_trait]
impl Source<Reading> for CrawlerSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        match self.receiver.lock().await.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "crawler stream already taken; only one consumer supported".to_string(),
                ))
            })),
        }
    }
}
