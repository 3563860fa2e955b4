use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Logs the ack/nak decision and handling time of every consumed message.
#[derive(Clone, Default)]
pub struct NatsConsumeLoggingLayer;

impl NatsConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsConsumeLoggingLayer {
    type Service = NatsConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for NatsConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let event = req.subject_suffix().to_string();
        let payload_bytes = req.payload.len();
        let started = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(ConsumeResponse::Ack) => info!(
                        subject = %subject,
                        event = %event,
                        payload_bytes,
                        elapsed_ms,
                        "acked {event} event"
                    ),
                    Ok(ConsumeResponse::Nak(reason)) => warn!(
                        subject = %subject,
                        event = %event,
                        payload_bytes,
                        elapsed_ms,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "rejected {event} event"
                    ),
                    Err(e) => error!(
                        subject = %subject,
                        event = %event,
                        elapsed_ms,
                        error = %e,
                        "{event} event handler failed"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{ready, Ready};
    use tower::ServiceExt;

    #[derive(Clone)]
    struct Fixed(ConsumeResponse);

    impl Service<ConsumeRequest> for Fixed {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = Ready<Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            ready(Ok(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_response_passes_through_unchanged() {
        let service = NatsConsumeLoggingLayer::new().layer(Fixed(ConsumeResponse::nak("bad id")));

        let response = service
            .oneshot(ConsumeRequest::new("devices.removed", "{}", None))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::Nak(Some("bad id".to_string())));
    }
}
