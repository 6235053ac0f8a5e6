//! Read-only HTTP dashboard over the observability store.
//!
//! JSON endpoints return store snapshots; `/events` streams `refresh`
//! tokens (server-sent events) whenever a record is inserted.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::error::Result;
use crate::pipeline::types::Origin;
use crate::store::{Store, Subscription};

const DEFAULT_LIMIT: usize = 50;

/// Routes listed by the index, as `(path, description)`.
const ENDPOINTS: &[(&str, &str)] = &[
    ("/health", "liveness check"),
    ("/api/messages", "recent processed events; ?source=<origin>&limit=<n>"),
    ("/api/listeners", "source listener status"),
    ("/api/notifications", "recent notifications; ?limit=<n>"),
    ("/api/stats", "aggregate counters"),
    ("/api/action-items", "detected action items; ?limit=<n>"),
    ("/events", "server-sent refresh events"),
];

/// Application state shared across handlers.
#[derive(Clone)]
pub struct DashboardState {
    pub store: Arc<Store>,
    /// Ends open event streams on shutdown.
    pub shutdown: CancellationToken,
}

/// Build the dashboard router.
pub fn dashboard_routes(store: Arc<Store>, shutdown: CancellationToken) -> Router {
    let state = DashboardState { store, shutdown };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/messages", get(list_messages))
        .route("/api/listeners", get(list_listeners))
        .route("/api/notifications", get(list_notifications))
        .route("/api/stats", get(get_stats))
        .route("/api/action-items", get(list_action_items))
        .route("/events", get(live_events))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the dashboard on `0.0.0.0:{port}` until `cancel` fires.
pub async fn serve(store: Arc<Store>, port: u16, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Dashboard listening");

    let app = dashboard_routes(store, cancel.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Dashboard stopped");
    Ok(())
}

// ── Health ──────────────────────────────────────────────────────────────

async fn index() -> impl IntoResponse {
    let endpoints: Vec<_> = ENDPOINTS
        .iter()
        .map(|(path, description)| serde_json::json!({ "path": path, "description": description }))
        .collect();
    Json(serde_json::json!({
        "service": "notify-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": endpoints,
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "notify-hub"
    }))
}

// ── Snapshots ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

#[derive(Debug, Default, Deserialize)]
struct MessagesQuery {
    source: Option<String>,
    limit: Option<usize>,
}

async fn list_messages(
    State(state): State<DashboardState>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let source = query.source.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let records = match source {
        None | Some("all") => state.store.recent(limit).await,
        Some(raw) => match raw.parse::<Origin>() {
            Ok(origin) => state.store.recent_by_origin(origin, limit).await,
            Err(message) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": message })),
                )
                    .into_response();
            }
        },
    };

    Json(records).into_response()
}

async fn list_listeners(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.store.listener_statuses().await)
}

async fn list_notifications(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.store.recent_notifications(query.limit()).await)
}

async fn get_stats(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

async fn list_action_items(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.store.action_items(query.limit()).await)
}

// ── Live updates ────────────────────────────────────────────────────────

async fn live_events(State(state): State<DashboardState>) -> impl IntoResponse {
    let stream = LiveStream::new(state.store, state.shutdown);
    debug!(subscription = %stream.id(), "Dashboard client subscribed");
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// SSE stream backed by a store subscription.
///
/// Ends when the server shuts down. The subscription is released exactly
/// once, when the stream is dropped.
struct LiveStream {
    store: Arc<Store>,
    subscription: Option<Subscription>,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl LiveStream {
    fn new(store: Arc<Store>, shutdown: CancellationToken) -> Self {
        let subscription = store.subscribe();
        Self {
            store,
            subscription: Some(subscription),
            shutdown: Box::pin(shutdown.cancelled_owned()),
        }
    }

    fn id(&self) -> String {
        self.subscription
            .as_ref()
            .map(|s| s.id().to_string())
            .unwrap_or_default()
    }
}

impl Stream for LiveStream {
    type Item = std::result::Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.shutdown.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        let Some(subscription) = self.subscription.as_mut() else {
            return Poll::Ready(None);
        };
        subscription.poll_recv(cx).map(|update| {
            update.map(|u| Ok(SseEvent::default().event(u.as_str()).data(u.as_str())))
        })
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(subscription = %subscription.id(), "Dashboard client unsubscribed");
            self.store.unsubscribe(subscription);
        }
    }
}
