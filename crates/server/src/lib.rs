//! # Histwatch Server
//!
//! Streams the ranked command history to HTTP clients, newest first.
//!
//! Every request gets a one-shot replay of everything known at the moment it
//! arrived: the handler captures the current highest rank once, then walks
//! downward emitting one flushed line per populated rank. The walk re-takes
//! the shared lock at every step, so it observes a live view bounded by the
//! captured horizon rather than an atomic snapshot — by the invariants of
//! the index (ranks only ever move upward) that can only hide entries, never
//! duplicate or reorder them. Clients wanting later updates reconnect.

mod auth;
mod stream;

pub use auth::{resolve_guarded_bind_addrs, AuthToken, AUTH_TOKEN_ENV};

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, Response as HttpResponse, StatusCode},
    response::Response,
    Router,
};
use histwatch_index::SharedIndex;
use tokio::net::TcpListener;

pub struct ServerState {
    pub index: SharedIndex,
    pub auth_token: Option<AuthToken>,
}

/// One endpoint, any method, any path.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new().fallback(move |headers: HeaderMap| history_handler(headers, state.clone()))
}

pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn history_handler(
    headers: HeaderMap,
    state: Arc<ServerState>,
) -> Result<Response, StatusCode> {
    if let Some(token) = &state.auth_token {
        if !auth::is_authorized(&headers, token) {
            // Unauthorized requests get a status and nothing else.
            return HttpResponse::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header("www-authenticate", "Bearer")
                .body(Body::empty())
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    // The snapshot horizon: everything at or below this rank, nothing above.
    let start = state.index.read().highest_rank();
    log::debug!("streaming history from rank {start} downward");

    HttpResponse::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from_stream(stream::rank_walk(
            state.index.clone(),
            start,
        )))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
