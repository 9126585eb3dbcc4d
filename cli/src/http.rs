//! Status page over HTTP.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local};
use engine::{BuildInfo, ErrorHistory, RunningTosser, StatusReport, TosserStat};
use tracing::info;

/// Shared application state
pub struct AppState {
    stats: Arc<TosserStat>,
    history: Arc<ErrorHistory>,
    started: DateTime<Local>,
}

impl AppState {
    pub fn new(stats: Arc<TosserStat>, history: Arc<ErrorHistory>, started: DateTime<Local>) -> Self {
        AppState {
            stats,
            history,
            started,
        }
    }

    pub fn from_running(running: &RunningTosser) -> Self {
        Self::new(
            Arc::clone(running.stats()),
            Arc::clone(running.history()),
            running.started(),
        )
    }

    pub fn report(&self) -> StatusReport {
        StatusReport::build(
            &self.stats,
            &self.history,
            self.started,
            Local::now(),
            BuildInfo::current(),
        )
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/api/status", get(status_json))
        .with_state(state)
}

async fn status_page(State(state): State<Arc<AppState>>) -> String {
    state.report().render_text()
}

async fn status_json(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.report())
}

/// Serve until `shutdown` resolves.
///
/// A bind failure is reported to the error history; routing carries on
/// without the status page.
pub async fn serve(listen: String, state: Arc<AppState>, shutdown: impl Future<Output = ()> + Send + 'static) {
    let history = Arc::clone(&state.history);
    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            history.report(format!("Failed to start status page on {}: {}", listen, e));
            return;
        }
    };
    info!(listen = %listen, "Status page listening");

    if let Err(e) = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        history.report(format!("Status page stopped: {}", e));
    }
}
