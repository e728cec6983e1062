//! Prometheus scrape endpoint.
//!
//! Serves the text exposition of a [`MetricsRecorder`] registry at
//! `GET /metrics`. Every other path is a 404.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::MetricsRecorder;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct MetricsExporter {
    listener: TcpListener,
    metrics: MetricsRecorder,
}

impl MetricsExporter {
    pub async fn bind(addr: &str, metrics: MetricsRecorder) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Answer scrapes until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = self.local_addr()?;
        info!(%local, "Metrics endpoint listening");
        axum::serve(self.listener, router(self.metrics))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

fn router(metrics: MetricsRecorder) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(metrics)
}

async fn scrape(State(metrics): State<MetricsRecorder>) -> Response {
    match metrics.gather_metrics() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
