//! Helpers for tests that need a live HTTP peer.

use axum::http::StatusCode;
use axum::routing::{get, MethodRouter};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral local port and return its address.
pub(crate) async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

/// A GET route that always answers with `status` and `body`.
pub(crate) fn static_route(status: StatusCode, body: &'static str) -> MethodRouter {
    get(move || async move { (status, body) })
}
