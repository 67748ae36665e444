//! The lifecycle contract shared by stateful components.
//!
//! [`Stream`](crate::stream::Stream) and
//! [`Subscriber`](crate::subscriber::Subscriber) implement [`Lifecycle`] so
//! they can be started, stopped and probed the same way as any other
//! connected component of an application.

use crate::errors::StreamResult;
use async_trait::async_trait;
use std::fmt;

/// Connection state of a lifecycle-managed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected; only `connect`, `readiness` and `liveness` are allowed.
    Disconnected,
    /// Connected; every operation except `connect` is allowed.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

/// Connect / disconnect / probe contract.
///
/// - `connect` fails with `AlreadyConnected` when called twice
/// - `disconnect` fails with `NotConnected` before `connect`
/// - `readiness` and `liveness` succeed while disconnected and perform a cheap
///   broker round trip while connected
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Moves the component to [`ConnectionState::Connected`].
    async fn connect(&self) -> StreamResult<()>;

    /// Releases every resource and moves back to [`ConnectionState::Disconnected`].
    async fn disconnect(&self) -> StreamResult<()>;

    /// Whether the component can serve requests.
    async fn readiness(&self) -> StreamResult<()>;

    /// Whether the component is still working.
    async fn liveness(&self) -> StreamResult<()>;

    /// Current connection state.
    async fn state(&self) -> ConnectionState;
}
