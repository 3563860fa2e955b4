use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::nats::trace_context::set_span_parent_from_headers;
use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

/// Opens a consumer span per message, continuing the publisher's trace.
#[derive(Clone, Default)]
pub struct NatsConsumeTracingLayer;

impl NatsConsumeTracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsConsumeTracingLayer {
    type Service = NatsConsumeTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeTracingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsConsumeTracingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for NatsConsumeTracingService<S>
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
        let span = info_span!(
            target: "nats",
            parent: Span::none(),
            "nats_consume",
            otel.name = "nats_consume",
            messaging.system = "nats",
            messaging.operation = "receive",
            messaging.destination.name = %req.subject,
            messaging.message.body.size = req.payload.len(),
            otel.status_code = field::Empty,
        );
        set_span_parent_from_headers(&span, req.headers.as_ref());

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let status = match &result {
                    Ok(response) if response.is_ack() => "OK",
                    _ => "ERROR",
                };
                Span::current().record("otel.status_code", status);
                result
            }
            .instrument(span),
        )
    }
}
