//! HTTP API server for the event-sourced command pipeline.
//!
//! Exposes counter commands and queries over REST, delivers committed events
//! to the demo activity feed through the recipe publisher, and runs the
//! background delivery workers. Structured logging via tracing, metrics via
//! Prometheus.

pub mod activity;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{CommandBus, CommandHandlers, CounterCommandHandler};
use event_store::DurableStore;
use metrics_exporter_prometheus::PrometheusHandle;
use publisher::{
    HandlerRegistry, InMemoryBackgroundQueue, PublishError, QueueWorker, RecipeEventPublisher,
    StaticFeatureFlags,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use activity::ActivityLog;
use config::Config;
use routes::metrics::MetricsState;

/// Shared application state accessible from all handlers.
pub struct AppState<S: DurableStore> {
    pub bus: CommandBus<S, RecipeEventPublisher>,
    pub registry: Arc<HandlerRegistry>,
    pub queue: Arc<InMemoryBackgroundQueue>,
    pub flags: Arc<StaticFeatureFlags>,
    pub activity: ActivityLog,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: DurableStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            queue: state.queue.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/counters", post(routes::counters::create::<S>))
        .route("/counters/{id}", get(routes::counters::get::<S>))
        .route(
            "/counters/{id}/increment",
            post(routes::counters::increment::<S>),
        )
        .route(
            "/counters/{id}/decrement",
            post(routes::counters::decrement::<S>),
        )
        .route("/counters/{id}/reset", post(routes::counters::reset::<S>))
        .route("/counters/{id}/events", get(routes::counters::events::<S>))
        .route(
            "/counters/{id}/activity",
            get(routes::counters::activity::<S>),
        )
        .route("/admin/redeliver", post(routes::admin::redeliver::<S>))
        .route(
            "/admin/local-handling",
            put(routes::admin::set_local_handling::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the command bus, the recipe publisher and the activity feed over
/// `store`.
pub fn create_default_state<S: DurableStore + Clone + 'static>(
    store: S,
    config: &Config,
) -> Result<Arc<AppState<S>>, PublishError> {
    let registry = Arc::new(HandlerRegistry::new(
        config.publisher.default_local_timeout,
    ));
    let activity = ActivityLog::new();
    activity.subscribe(&registry)?;

    let queue = Arc::new(InMemoryBackgroundQueue::new());
    let flags = Arc::new(StaticFeatureFlags::from_env());
    let publisher = RecipeEventPublisher::new(
        &config.publisher,
        registry.clone(),
        queue.clone(),
        flags.clone(),
    );

    let mut handlers = CommandHandlers::new();
    CounterCommandHandler::register(&mut handlers);

    Ok(Arc::new(AppState {
        bus: CommandBus::new(store, handlers, publisher),
        registry,
        queue,
        flags,
        activity,
    }))
}

/// Starts the background delivery workers for `state`'s queue.
pub fn spawn_queue_workers<S: DurableStore>(
    state: &AppState<S>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    QueueWorker::new(
        state.registry.clone(),
        state.queue.clone(),
        state.queue.clone(),
        config.publisher.queue_max_attempts,
    )
    .spawn(config.queue_workers, shutdown)
}
