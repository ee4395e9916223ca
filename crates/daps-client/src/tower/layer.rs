//! Tower Layer for bearer injection

use std::sync::Arc;

use tower::Layer;

use super::service::BearerService;
use crate::cache::DatProvider;

/// Tower Layer that adds the DAT to outgoing requests
#[derive(Clone)]
pub struct BearerLayer {
    provider: Arc<dyn DatProvider>,
}

impl BearerLayer {
    /// Create a layer drawing DATs from `provider`
    pub fn new(provider: Arc<dyn DatProvider>) -> Self {
        Self { provider }
    }
}

impl std::fmt::Debug for BearerLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for BearerLayer {
    type Service = BearerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerService::new(inner, Arc::clone(&self.provider))
    }
}
