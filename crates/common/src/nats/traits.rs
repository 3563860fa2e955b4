use anyhow::Result;
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;

/// Creates durable pull consumers on a JetStream stream.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>>;
}

/// Fetches batches from a pull consumer.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Returns up to `max_messages`, waiting at most `expires`.
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<jetstream::Message>>;
}

/// Stream management and acknowledged publishing on JetStream.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    async fn get_stream(&self, stream_name: &str) -> Result<()>;

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()>;

    /// Publishes and waits for the stream acknowledgment.
    async fn publish(&self, subject: String, headers: HeaderMap, payload: Bytes) -> Result<()>;
}

/// Fire-and-forget publishing on core NATS with a reply subject.
///
/// Used for request/reply exchanges where the answer is collected by a
/// separate subscription instead of being awaited inline.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CorePublisher: Send + Sync {
    async fn publish_with_reply(
        &self,
        subject: String,
        reply: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<()>;
}
