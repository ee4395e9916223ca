//! Tower Service for bearer injection

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, HeaderValue};
use tower::BoxError;
use tower_service::Service;
use tracing::{debug, error};

use crate::cache::DatProvider;
use crate::error::DapsError;

/// Future returned by [`BearerService`]
pub type BearerServiceFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// Tower Service that sets `Authorization: Bearer <dat>` before forwarding
#[derive(Clone)]
pub struct BearerService<S> {
    inner: S,
    provider: Arc<dyn DatProvider>,
}

impl<S> BearerService<S> {
    /// Wrap `inner`
    pub fn new(inner: S, provider: Arc<dyn DatProvider>) -> Self {
        Self { inner, provider }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for BearerService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<S, B> Service<http::Request<B>> for BearerService<S>
where
    S: Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BearerServiceFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let provider = Arc::clone(&self.provider);
        // The clone is not ready; keep the driven service for this call
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move {
            let token = provider.get_dat().await.map_err(|e| {
                error!(uri = %req.uri(), error = %e, "Failed to obtain DAT, request not sent");
                BoxError::from(e)
            })?;

            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                BoxError::from(DapsError::MalformedResponse(
                    "DAT contains characters not allowed in a header".to_string(),
                ))
            })?;
            value.set_sensitive(true);
            req.headers_mut().insert(AUTHORIZATION, value);
            debug!(method = %req.method(), uri = %req.uri(), "Bearer header set");

            inner.call(req).await.map_err(Into::into)
        })
    }
}
