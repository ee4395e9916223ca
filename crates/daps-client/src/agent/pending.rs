//! Outgoing request awaiting its bearer token
//!
//! ```text
//! Created ─▶ AwaitingToken ─┬─▶ HeaderSet ─▶ AwaitingSocket ─▶ SocketAttached ─▶ Flushed
//!                           └─▶ Aborted  (reachable from any non-terminal state)
//! ```
//!
//! Body writes and the final `end` are queued until a connection is
//! attached. Attaching sends the head, flushes the queue in FIFO order and
//! finishes the request if `end` was already called. Writes after that go
//! straight to the connection.

use std::collections::VecDeque;
use std::fmt;
use std::io;

use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderValue};
use http::request::Parts;
use tracing::{debug, trace, warn};

use crate::error::{DapsError, Result};

/// Lifecycle state of a [`PendingRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Built but not handed to the agent
    Created,
    /// Waiting for a DAT
    AwaitingToken,
    /// `Authorization` header present
    HeaderSet,
    /// Waiting for the connection
    AwaitingSocket,
    /// Connection attached, head and queued writes sent
    SocketAttached,
    /// Request finished on the connection
    Flushed,
    /// Failed or cancelled before being flushed
    Aborted,
}

impl RequestState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Flushed | Self::Aborted)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::AwaitingToken => "awaiting-token",
            Self::HeaderSet => "header-set",
            Self::AwaitingSocket => "awaiting-socket",
            Self::SocketAttached => "socket-attached",
            Self::Flushed => "flushed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A writable connection to the request's origin
///
/// The methods run on the async runtime while the request's lock is held,
/// so they must not block. Implementations over a real socket should hand
/// the bytes to a writer task, for example through a channel, and report
/// its failures on the next call.
pub trait Connection: Send {
    /// Send the request line and headers
    fn send_head(&mut self, head: &Parts) -> io::Result<()>;
    /// Send a body chunk
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
    /// Complete the request
    fn finish(&mut self) -> io::Result<()>;
}

/// An outgoing request whose transmission is deferred until it carries a DAT
pub struct PendingRequest<C> {
    head: Parts,
    state: RequestState,
    history: Vec<RequestState>,
    queued: VecDeque<Bytes>,
    end_queued: bool,
    connection: Option<C>,
    error: Option<DapsError>,
}

impl<C: Connection> PendingRequest<C> {
    /// New request in the `Created` state
    pub fn new(head: Parts) -> Self {
        Self {
            head,
            state: RequestState::Created,
            history: vec![RequestState::Created],
            queued: VecDeque::new(),
            end_queued: false,
            connection: None,
            error: None,
        }
    }

    /// Current state
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Every state the request has been in, oldest first
    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    /// Request head, including the `Authorization` header once set
    pub fn head(&self) -> &Parts {
        &self.head
    }

    /// Failure that aborted the request
    pub fn error(&self) -> Option<&DapsError> {
        self.error.as_ref()
    }

    /// Number of body chunks waiting for the connection
    pub fn queued_writes(&self) -> usize {
        self.queued.len()
    }

    /// Whether `end` has been called
    pub fn is_ended(&self) -> bool {
        self.end_queued
    }

    fn transition(&mut self, from: &[RequestState], to: RequestState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(DapsError::RequestState(format!(
                "cannot move from {} to {to}",
                self.state
            )));
        }
        trace!(from = %self.state, to = %to, "Request state transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Start waiting for a DAT
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] unless the request is `Created`.
    pub fn begin_deferral(&mut self) -> Result<()> {
        self.transition(&[RequestState::Created], RequestState::AwaitingToken)
    }

    /// Set `Authorization: Bearer <token>`
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] unless the request is awaiting its
    /// token, or [`DapsError::MalformedResponse`] if the token cannot be a
    /// header value.
    pub fn authorize(&mut self, token: &str) -> Result<()> {
        if self.state != RequestState::AwaitingToken {
            return Err(DapsError::RequestState(format!(
                "cannot set the bearer header in state {}",
                self.state
            )));
        }
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            DapsError::MalformedResponse("DAT contains characters not allowed in a header".to_string())
        })?;
        value.set_sensitive(true);
        self.head.headers.insert(AUTHORIZATION, value);
        self.transition(&[RequestState::AwaitingToken], RequestState::HeaderSet)
    }

    /// Start waiting for the connection
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] unless the header is set.
    pub fn await_socket(&mut self) -> Result<()> {
        self.transition(&[RequestState::HeaderSet], RequestState::AwaitingSocket)
    }

    /// Queue a body chunk, or write it directly once a connection is attached
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] after `end` or abort, and
    /// [`DapsError::Transport`] if a direct write fails (the request is
    /// aborted in that case).
    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<()> {
        self.ensure_writable("write")?;
        let chunk = chunk.into();
        match self.connection.as_mut() {
            Some(connection) => {
                if let Err(e) = connection.write(&chunk) {
                    return Err(self.fail_io(e));
                }
            }
            None => self.queued.push_back(chunk),
        }
        Ok(())
    }

    /// Finish the request, deferred until a connection is attached
    ///
    /// # Errors
    ///
    /// Same as [`PendingRequest::write`].
    pub fn end(&mut self) -> Result<()> {
        self.ensure_writable("end")?;
        self.end_queued = true;
        if self.connection.is_some() {
            self.finish()?;
        }
        Ok(())
    }

    /// Attach the connection and release everything queued
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] unless the request is awaiting its
    /// connection, and [`DapsError::Transport`] if sending fails (the request
    /// is aborted in that case).
    pub fn attach(&mut self, mut connection: C) -> Result<()> {
        self.transition(&[RequestState::AwaitingSocket], RequestState::SocketAttached)?;

        if let Err(e) = connection.send_head(&self.head) {
            return Err(self.fail_io(e));
        }
        let queued = self.queued.len();
        while let Some(chunk) = self.queued.pop_front() {
            if let Err(e) = connection.write(&chunk) {
                return Err(self.fail_io(e));
            }
        }
        debug!(queued, ended = self.end_queued, "Connection attached, queued writes flushed");

        self.connection = Some(connection);
        if self.end_queued {
            self.finish()?;
        }
        Ok(())
    }

    /// Abort the request, dropping queued writes and the connection
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::RequestState`] if the request already finished
    /// or was aborted.
    pub fn abort(&mut self, error: DapsError) -> Result<()> {
        if self.state.is_terminal() {
            return Err(DapsError::RequestState(format!(
                "cannot abort a request in state {}",
                self.state
            )));
        }
        warn!(state = %self.state, error = %error, "Aborting request");
        self.queued.clear();
        self.connection = None;
        self.error = Some(error);
        self.state = RequestState::Aborted;
        self.history.push(RequestState::Aborted);
        Ok(())
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.state.is_terminal() || self.end_queued {
            return Err(DapsError::RequestState(format!(
                "{operation} after the request ended (state {})",
                self.state
            )));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let result = match self.connection.as_mut() {
            Some(connection) => connection.finish(),
            None => return Ok(()),
        };
        if let Err(e) = result {
            return Err(self.fail_io(e));
        }
        self.transition(&[RequestState::SocketAttached], RequestState::Flushed)
    }

    fn fail_io(&mut self, error: io::Error) -> DapsError {
        let error = DapsError::from(error);
        // Only non-terminal states reach here
        let _ = self.abort(error.clone());
        error
    }
}

impl<C> fmt::Debug for PendingRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("state", &self.state)
            .field("queued", &self.queued.len())
            .field("end_queued", &self.end_queued)
            .field("attached", &self.connection.is_some())
            .finish()
    }
}
