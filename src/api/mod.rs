mod error;
mod handlers;
pub mod middleware;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::SessionManager;
use crate::config::AppConfig;
use crate::db::Database;

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub sessions: SessionManager,
}

pub fn create_router(db: Database, config: &AppConfig) -> Router {
    let state = AppState {
        sessions: SessionManager::new(db.clone(), config.sessions),
        db,
    };

    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh));

    let protected = Router::new()
        .route("/auth/invalidate", post(handlers::invalidate_tokens))
        // Users
        .route("/me", get(handlers::current_user))
        .route("/users", get(handlers::list_users))
        // Organizations
        .route(
            "/orgs",
            get(handlers::list_organizations).post(handlers::create_organization),
        )
        .route("/orgs/{id}", get(handlers::get_organization))
        .route("/orgs/{id}/tasks", post(handlers::create_task))
        .route("/orgs/{id}/tasks/tree", get(handlers::get_task_tree))
        // Tasks
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/{id}", get(handlers::get_task))
        .route(
            "/tasks/{id}/properties",
            put(handlers::update_task_properties),
        )
        .route(
            "/tasks/{id}/watchers/{user_id}",
            post(handlers::add_task_watcher).delete(handlers::remove_task_watcher),
        )
        .route(
            "/tasks/{id}/assignees/{user_id}",
            post(handlers::add_task_assignee).delete(handlers::remove_task_assignee),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut router = Router::new().nest("/api/v1", public.merge(protected));

    if let Some(rate_limiter) = config.security.rate_limiter.clone() {
        router = router.layer(from_fn_with_state(
            rate_limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config.security.cors_origins.as_deref()))
        .with_state(state)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}
