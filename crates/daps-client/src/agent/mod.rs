//! Bearer agent: attaches the DAT to outgoing requests
//!
//! The agent defers a request until a DAT is available, sets
//! `Authorization: Bearer <dat>`, and only then lets the connector open a
//! connection. If the DAT cannot be obtained the request is aborted
//! before anything reaches the wire and the error is returned to the
//! caller.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use daps_client::agent::{BearerAgent, Connector};
//! # use daps_client::{DapsClient, Result};
//! # async fn run<C: Connector>(client: Arc<DapsClient>, connector: C) -> Result<()> {
//! let agent = BearerAgent::new(client, connector);
//!
//! let head = http::Request::post("https://broker.example.com/infrastructure")
//!     .body(())
//!     .map_err(|e| daps_client::DapsError::invalid_parameter("request", e.to_string()))?
//!     .into_parts()
//!     .0;
//! let request = agent.request(head);
//! request.write(&b"{\"@type\": \"ids:QueryMessage\"}"[..])?;
//! request.end()?;
//! agent.add_request(&request).await?;
//! # Ok(())
//! # }
//! ```

pub mod pending;

pub use pending::{Connection, PendingRequest, RequestState};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::request::Parts;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::cache::DatProvider;
use crate::error::{DapsError, Result};

/// Opens connections for authorized requests
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connection type produced
    type Connection: Connection;

    /// Open a connection to the origin of `head`
    async fn connect(&self, head: &Parts) -> Result<Self::Connection>;
}

/// Shared handle to a [`PendingRequest`]
///
/// The caller keeps writing through the handle while the agent acquires
/// the DAT and the connection.
pub struct RequestHandle<C> {
    inner: Arc<Mutex<PendingRequest<C>>>,
}

impl<C> Clone for RequestHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for RequestHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestHandle").field(&*self.inner.lock()).finish()
    }
}

impl<C: Connection> RequestHandle<C> {
    /// Wrap a new request
    pub fn new(head: Parts) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PendingRequest::new(head))),
        }
    }

    /// Write a body chunk (queued until the connection is attached)
    ///
    /// # Errors
    ///
    /// See [`PendingRequest::write`].
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.inner.lock().write(chunk)
    }

    /// Finish the request (deferred until the connection is attached)
    ///
    /// # Errors
    ///
    /// See [`PendingRequest::end`].
    pub fn end(&self) -> Result<()> {
        self.inner.lock().end()
    }

    /// Cancel the request
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] if the request already finished.
    pub fn abort(&self) -> Result<()> {
        self.inner
            .lock()
            .abort(DapsError::RequestState("request aborted by caller".to_string()))
    }

    /// Current state
    pub fn state(&self) -> RequestState {
        self.inner.lock().state()
    }

    /// Every state the request has been in
    pub fn history(&self) -> Vec<RequestState> {
        self.inner.lock().history().to_vec()
    }

    /// Failure that aborted the request
    pub fn error(&self) -> Option<DapsError> {
        self.inner.lock().error().cloned()
    }

    /// Copy of the request head
    pub fn head(&self) -> Parts {
        self.inner.lock().head().clone()
    }

    fn fail(&self, error: DapsError) -> DapsError {
        let mut request = self.inner.lock();
        if !request.state().is_terminal() {
            // Non-terminal, cannot fail
            let _ = request.abort(error.clone());
        }
        error
    }
}

/// Transport decorator that defers requests until they carry a DAT
pub struct BearerAgent<K> {
    provider: Arc<dyn DatProvider>,
    connector: K,
}

impl<K> fmt::Debug for BearerAgent<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAgent").finish_non_exhaustive()
    }
}

impl<K: Connector> BearerAgent<K> {
    /// Create an agent drawing DATs from `provider`
    pub fn new(provider: Arc<dyn DatProvider>, connector: K) -> Self {
        Self {
            provider,
            connector,
        }
    }

    /// Connector used for authorized requests
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Start a request; writes are buffered until [`BearerAgent::add_request`] completes
    pub fn request(&self, head: Parts) -> RequestHandle<K::Connection> {
        RequestHandle::new(head)
    }

    /// Authorize the request and hand it to a new connection
    ///
    /// # Errors
    ///
    /// Returns the DAT provider's or connector's error after aborting the
    /// request; nothing is sent in that case. Returns
    /// [`DapsError::RequestState`] if the caller aborted the request meanwhile.
    pub async fn add_request(&self, request: &RequestHandle<K::Connection>) -> Result<()> {
        request.inner.lock().begin_deferral()?;

        let token = match self.provider.get_dat().await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, category = e.category(), "Failed to obtain DAT for request");
                return Err(request.fail(e));
            }
        };

        let head = {
            let mut pending = request.inner.lock();
            if let Err(e) = pending.authorize(&token).and_then(|()| pending.await_socket()) {
                drop(pending);
                return Err(request.fail(e));
            }
            pending.head().clone()
        };
        debug!(method = %head.method, uri = %head.uri, "Bearer header set, connecting");

        let connection = match self.connector.connect(&head).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(uri = %head.uri, error = %e, "Failed to connect");
                return Err(request.fail(e));
            }
        };

        request.inner.lock().attach(connection)
    }

    /// Send a complete request body
    ///
    /// # Errors
    ///
    /// See [`BearerAgent::add_request`].
    pub async fn send(&self, head: Parts, body: impl Into<Bytes>) -> Result<RequestHandle<K::Connection>> {
        let request = self.request(head);
        request.write(body)?;
        request.end()?;
        self.add_request(&request).await?;
        Ok(request)
    }
}
