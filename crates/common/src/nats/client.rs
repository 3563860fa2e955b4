use crate::nats::traits::{CorePublisher, JetStreamConsumer, JetStreamPublisher, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Shared NATS connection plus its JetStream context.
///
/// Hands out trait-object publishers and consumers so domain code can be
/// tested against mocks.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    /// Connects to `url`, failing if the handshake takes longer than `timeout`.
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Creates `stream_name` capturing `{stream_name}.>` if it does not exist yet.
    pub async fn ensure_stream(&self, stream_name: &str, description: &str) -> Result<()> {
        info!(stream = %stream_name, "Ensuring stream exists");

        if self.jetstream.get_stream(stream_name).await.is_ok() {
            info!(stream = %stream_name, "Stream already exists");
            return Ok(());
        }

        let stream_config = StreamConfig {
            name: stream_name.to_string(),
            subjects: vec![format!("{}.>", stream_name)],
            description: Some(description.to_string()),
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create stream")?;
        info!(stream = %stream_name, "Created stream");

        Ok(())
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Fresh unique inbox subject for collecting replies.
    pub fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }

    /// Core (non-JetStream) subscription, used for request replies.
    pub async fn subscribe(&self, subject: String) -> Result<async_nats::Subscriber> {
        self.client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))
    }

    /// Pull-consumer factory bound to this connection's JetStream context.
    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    /// Publisher that waits for the JetStream ack on every message.
    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Fire-and-forget publisher carrying a reply subject.
    pub fn create_core_publisher(&self) -> Arc<dyn CorePublisher> {
        Arc::new(NatsCorePublisher::new(self.client.clone()))
    }

    /// Flushes buffered publishes so pending requests and state snapshots
    /// reach the server before shutdown. The connection itself closes when
    /// the last client handle is dropped.
    pub async fn close(&self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")
    }
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("Failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<jetstream::Message>> {
        use futures::StreamExt;

        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut result = Vec::new();
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(message) => result.push(message),
                Err(e) => error!(error = %e, "Error receiving message"),
            }
        }
        Ok(result)
    }
}

pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn get_stream(&self, stream_name: &str) -> Result<()> {
        self.context
            .get_stream(stream_name)
            .await
            .context("Failed to get stream")?;
        Ok(())
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.context
            .create_stream(config)
            .await
            .context("Failed to create stream")?;
        Ok(())
    }

    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, headers: HeaderMap, payload: Bytes) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}

pub struct NatsCorePublisher {
    client: async_nats::Client,
}

impl NatsCorePublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CorePublisher for NatsCorePublisher {
    #[instrument(skip(self, headers, payload), fields(subject = %subject, reply = %reply))]
    async fn publish_with_reply(
        &self,
        subject: String,
        reply: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<()> {
        self.client
            .publish_with_reply_and_headers(subject, reply, headers, payload)
            .await
            .context("Failed to publish request")?;
        Ok(())
    }
}
