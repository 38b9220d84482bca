pub mod app_state;
pub mod config;
pub mod middleware;
pub mod routes;
pub mod transcode;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;

//
// Re-export
//
pub use app_state::AppState;
pub use config::Config;
pub use routes::{ConvertFailure, ConvertSuccess, convert, serve_upload};
pub use transcode::Transcoder;

pub async fn run(config: Config) {
    let state = AppState::new(&config)
        .await
        .expect("Failed to create app state");

    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/convert", post(convert))
        .route("/uploads/{filename}", get(serve_upload))
        // uploads carry whole video files, so no body cap
        .layer(DefaultBodyLimit::disable())
        .layer(axum::middleware::from_fn(middleware::log_request_outcome))
        .layer(cors)
        .layer(Extension(state));

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    info!("Listening on http://{addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
