use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Envelope, EnvelopeStream, Source};

/// In-process source fed by the accumulators.
///
/// The stream ends when every sender is dropped, or on cancellation after
/// the records already buffered in the channel have been yielded.
pub struct ChannelSource<T> {
    receiver: Arc<Mutex<Option<mpsc::Receiver<Envelope<T>>>>>,
    shutdown: CancellationToken,
}

impl<T> ChannelSource<T> {
    pub fn new(capacity: usize, shutdown: CancellationToken) -> (mpsc::Sender<Envelope<T>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = Self {
            receiver: Arc::new(Mutex::new(Some(rx))),
            shutdown,
        };
        (tx, source)
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> Source<T> for ChannelSource<T> {
    async fn stream(&self) -> EnvelopeStream<T> {
        let rx = self.receiver.lock().await.take();
        let shutdown = self.shutdown.clone();

        let s = async_stream::stream! {
            let Some(mut rx) = rx else {
                tracing::error!("channel source stream already taken; only one consumer supported");
                return;
            };

            loop {
                // After close() the receiver still hands out buffered records.
                let next = tokio::select! {
                    item = rx.recv() => item,
                    _ = shutdown.cancelled() => {
                        rx.close();
                        rx.recv().await
                    }
                };
                match next {
                    Some(env) => yield Ok(env),
                    None => break,
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn drains_buffered_records_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (tx, source) = ChannelSource::new(8, shutdown.clone());

        for i in 0..3 {
            tx.send(Envelope::now(i)).await.unwrap();
        }
        shutdown.cancel();

        let items: Vec<i32> = source
            .stream()
            .await
            .map(|r| r.unwrap().payload)
            .collect()
            .await;
        assert_eq!(items, vec![0, 1, 2]);
        // `tx` is still alive: the stream ended because of the shutdown.
        drop(tx);
    }

    #[tokio::test]
    async fn ends_when_senders_drop() {
        let (tx, source) = ChannelSource::new(4, CancellationToken::new());
        tx.send(Envelope::now("a")).await.unwrap();
        drop(tx);

        let items: Vec<&str> = source.stream().await.map(|r| r.unwrap().payload).collect().await;
        assert_eq!(items, vec!["a"]);
    }

    #[tokio::test]
    async fn second_stream_is_empty() {
        let (_tx, source) = ChannelSource::<u8>::new(1, CancellationToken::new());
        let _first = source.stream().await;
        let second: Vec<_> = source.stream().await.collect().await;
        assert!(second.is_empty());
    }
}
