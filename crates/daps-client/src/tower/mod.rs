//! Tower middleware that attaches the DAT to outgoing HTTP requests
//!
//! [`BearerLayer`] wraps any `Service<http::Request<B>>` (a hyper or
//! reqwest-backed client stack, for example) with [`BearerService`], which
//! obtains a DAT before the request reaches the inner service and sets
//! `Authorization: Bearer <dat>`. A request whose DAT cannot be obtained is
//! never passed on.
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use daps_client::tower::BearerLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(BearerLayer::new(daps_client))
//!     .service(http_client);
//! ```

mod layer;
mod service;

pub use layer::BearerLayer;
pub use service::{BearerService, BearerServiceFuture};
