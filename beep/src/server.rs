//! TCP server helpers for the `stream` transport: accept connections and
//! hand each one a [`Peer`] already through the greeting handshake.

use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use beep_core::registry::ProfileRegistry;
use beep_core::session::Role;

use crate::peer::Peer;
use crate::transport::Transport;
use crate::PeerConfig;

/// Wrap an accepted `TcpStream` in a [`Peer`] acting as the listener side,
/// sending our greeting immediately.
pub fn serve_connection(stream: TcpStream, config: PeerConfig, registry: ProfileRegistry) -> Peer {
    let transport = Transport::stream(stream, config.max_partial_frame);
    Peer::handshake(Role::Listener, transport, config, registry)
}

/// Bind `addr` and hand each accepted connection to `make_server`, which
/// returns a future driving that connection to completion. `registry` is
/// cloned for every accepted connection, so its profile handlers must be
/// safe to run concurrently across connections. Runs until the listener
/// errors (the caller is expected to wrap this in its own supervision/retry
/// policy).
pub async fn run_tcp_server<F, Fut>(
    addr: &str,
    config: PeerConfig,
    registry: ProfileRegistry,
    make_server: F,
) -> std::io::Result<()>
where
    F: Fn(Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let make_server = Arc::new(make_server);
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        tracing::debug!(%peer_addr, "accepted connection");
        let make_server = make_server.clone();
        let peer = serve_connection(stream, config.clone(), registry.clone());
        tokio::spawn(async move { make_server(peer).await });
    }
}

/// Implemented by anything that can drive itself to completion once handed
/// a raw TCP stream, bundling `serve_connection` with the caller's own
/// per-connection setup (profile registration, per-connection config).
pub trait TcpServable {
    fn serve_tcp(self, stream: TcpStream) -> impl Future<Output = ()> + Send;
}
