//! HTTP surface of the durable progress store.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod routes;

use axum::Router;
use storage::repository::Storage;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::ServerConfig;
pub use error::{ApiError, ServerError};

/// Every endpoint, over any durable store.
pub fn router(storage: Storage) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::progress_routes(storage))
        .layer(TraceLayer::new_for_http())
}

/// Serve `storage` on an already bound listener until the task is dropped.
///
/// # Errors
///
/// Returns `ServerError::Io` if the server stops on an I/O error.
pub async fn serve_on(listener: TcpListener, storage: Storage) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "progress store listening");
    }
    axum::serve(listener, router(storage)).await?;
    Ok(())
}

/// Open the `SQLite` store named in `config` and serve it.
///
/// # Errors
///
/// Returns `ServerError` if the database cannot be opened or the address
/// cannot be bound.
pub async fn serve(config: &ServerConfig) -> Result<(), ServerError> {
    let storage = Storage::sqlite(&config.database_url).await?;
    let listener = TcpListener::bind(config.bind).await?;
    serve_on(listener, storage).await
}
