use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, warn};

/// Durable consumer settings.
#[derive(Debug, Clone)]
pub struct TowerConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// Pulls JetStream messages one batch at a time and feeds each message
/// through a tower service, acking or naking on its response.
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    config: TowerConsumerConfig,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: TowerConsumerConfig,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter_subject = %config.subject_filter,
            "creating tower nats consumer"
        );

        let pull_config = jetstream::consumer::pull::Config {
            name: Some(config.consumer_name.clone()),
            durable_name: Some(config.consumer_name.clone()),
            filter_subject: config.subject_filter.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(pull_config, &config.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            config,
            service,
        })
    }

    /// Runs until `ctx` is cancelled.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        debug!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "starting tower nats consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        stream = %self.config.stream_name,
                        consumer = %self.config.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            stream = %self.config.stream_name,
                            consumer = %self.config.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn fetch_and_process_batch(&mut self) -> Result<()> {
        let raw_messages = self
            .consumer
            .fetch_messages(self.config.batch_size, self.config.max_wait)
            .await?;

        if raw_messages.is_empty() {
            return Ok(());
        }

        debug!(message_count = raw_messages.len(), "received message batch");

        for msg in &raw_messages {
            let request = ConsumeRequest::new(
                msg.subject.to_string(),
                Bytes::copy_from_slice(&msg.payload),
                msg.headers.clone(),
            );

            let response = match self.service.call(request).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(subject = %msg.subject, error = %e, "service error processing message");
                    ConsumeResponse::nak(e.to_string())
                }
            };

            match response {
                ConsumeResponse::Ack => {
                    if let Err(e) = msg.ack().await {
                        error!(subject = %msg.subject, error = %e, "failed to acknowledge message");
                    }
                }
                ConsumeResponse::Nak(reason) => {
                    warn!(
                        subject = %msg.subject,
                        reason = reason.as_deref().unwrap_or("none"),
                        "rejecting message"
                    );
                    if let Err(e) = msg.ack_with(jetstream::AckKind::Nak(None)).await {
                        error!(subject = %msg.subject, error = %e, "failed to reject message");
                    }
                }
            }
        }

        Ok(())
    }
}
