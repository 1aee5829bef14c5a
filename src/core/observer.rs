use std::net::SocketAddr;

/// Snapshot of a connected client, returned by
/// [`crate::core::server::Server::active_clients`].
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub peer: SocketAddr,
    pub requests_served: u64,
}

/// Fired by a connection worker around each lifecycle event (`spec.md`
/// §4.7). Implementations run inline on the worker's task, so they must be
/// cheap and must not block; `on_request` is called after the response bytes
/// are queued for write, not before.
pub trait Observer: Send + Sync {
    fn on_connect(&self, _peer: SocketAddr) {}
    fn on_request(&self, _peer: SocketAddr, _function_code: u8) {}
    fn on_disconnect(&self, _peer: SocketAddr) {}
}

/// Default no-op observer used when a [`crate::core::server::Server`] is
/// built without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}
