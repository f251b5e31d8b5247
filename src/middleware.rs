//! Tower middleware that gates a service behind a [`RateLimitController`].
//!
//! Each request is mapped to a client identifier by an extractor closure. Only requests the
//! controller allows reach the inner service; denials and failed decisions short-circuit with
//! a [`ThrottleServiceError`].

use crate::controller::{Decision, RateLimitController};
use crate::error::ErrorKind;
use crate::store::CounterStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Error returned by [`ThrottleService`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleServiceError<E> {
    /// The client is over its limit for the current window.
    #[error("rate limit exceeded ({count} actions in window)")]
    Denied { count: u64 },
    /// The decision could not be made; the request was refused.
    #[error("rate limiter unavailable: {kind}")]
    Unavailable { kind: ErrorKind },
    /// The inner service failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> ThrottleServiceError<E> {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}

/// Layer producing [`ThrottleService`]s that share one controller.
pub struct ThrottleLayer<St, F> {
    controller: RateLimitController<St>,
    extract: Arc<F>,
}

impl<St, F> ThrottleLayer<St, F> {
    /// `extract` maps a request to the identifier passed to
    /// [`RateLimitController::evaluate`].
    pub fn new(controller: RateLimitController<St>, extract: F) -> Self {
        Self { controller, extract: Arc::new(extract) }
    }
}

impl<St, F> Clone for ThrottleLayer<St, F> {
    fn clone(&self) -> Self {
        Self { controller: self.controller.clone(), extract: Arc::clone(&self.extract) }
    }
}

impl<S, St, F> Layer<S> for ThrottleLayer<St, F> {
    type Service = ThrottleService<S, St, F>;

    fn layer(&self, service: S) -> Self::Service {
        ThrottleService {
            inner: service,
            controller: self.controller.clone(),
            extract: Arc::clone(&self.extract),
        }
    }
}

/// Middleware service that evaluates the rate limit before calling `inner`.
pub struct ThrottleService<S, St, F> {
    inner: S,
    controller: RateLimitController<St>,
    extract: Arc<F>,
}

impl<S: Clone, St, F> Clone for ThrottleService<S, St, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            controller: self.controller.clone(),
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<S, St, F, Req> Service<Req> for ThrottleService<S, St, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    St: CounterStore + 'static,
    F: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = ThrottleServiceError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ThrottleServiceError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let controller = self.controller.clone();
        let identifier = (self.extract)(&req);
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match controller.evaluate(&identifier).await {
                Decision::Allow { .. } => inner.call(req).await.map_err(ThrottleServiceError::Inner),
                Decision::Deny { count } => Err(ThrottleServiceError::Denied { count }),
                Decision::Error { kind } => Err(ThrottleServiceError::Unavailable { kind }),
            }
        })
    }
}
