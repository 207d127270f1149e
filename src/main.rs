#![warn(clippy::all, clippy::nursery, clippy::pedantic)]
use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub use crate::state::AppState;

mod auth;
mod handler;
mod push;
mod state;
mod storage;
#[cfg(test)]
mod testutil;
mod variant;

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();
    let state = AppState::new();
    let bind_address = state.config.bind_address;

    let app = router(state);

    info!(%bind_address, "Binding to address");
    let tcp = TcpListener::bind(bind_address).await.unwrap();
    info!(%bind_address, "Server listening on socket");
    axum::serve(tcp, app)
        .with_graceful_shutdown(vss::shutdown_signal())
        .await
        .unwrap();
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handler::notification))
        .route("/healthcheck", get(handler::healthcheck))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

pub fn check_truthy(data: &str) -> bool {
    let d = data.to_ascii_lowercase();
    !(d == "f" || d == "false" || d == "0" || d == "n" || d == "no")
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("S3 error")]
    S3(#[from] s3::error::S3Error),
    #[error("Filesystem error")]
    Io(#[from] std::io::Error),
    #[error("HTTP error")]
    Http(#[from] reqwest::Error),
    #[error("Image processing error")]
    Image(#[from] image::ImageError),
    #[error("Join error")]
    Join(#[from] tokio::task::JoinError),
    #[error("WebP reported an unusual error: {0}")]
    WebPStr(String),
    #[error("Photo push returned status {0}")]
    PushStatus(reqwest::StatusCode),
    #[error("Missing required form field {0}")]
    MissingField(&'static str),
    #[error("You're not authorized")]
    Forbidden,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(source = ?self, "Error handling request");
            return (status, Body::from("Internal server error")).into_response();
        }
        debug!(source = ?self, "Failed to handle request");
        (status, self.to_string()).into_response()
    }
}

impl Error {
    const fn status(&self) -> StatusCode {
        match self {
            Self::S3(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Image(_)
            | Self::Join(_)
            | Self::WebPStr(_)
            | Self::PushStatus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}
