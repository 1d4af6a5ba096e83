use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::PermissionResolver;
use crate::engine::OperationPipeline;
use crate::jwt::{JwtConfig, JwtPermissionResolver};
use crate::routes::{entities, health};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: OperationPipeline,
    pub resolver: Arc<dyn PermissionResolver>,
}

impl AppState {
    pub fn new(pipeline: OperationPipeline, jwt: JwtConfig) -> Self {
        Self::with_resolver(pipeline, Arc::new(JwtPermissionResolver::new(jwt)))
    }

    pub fn with_resolver(pipeline: OperationPipeline, resolver: Arc<dyn PermissionResolver>) -> Self {
        Self { pipeline, resolver }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any)
        .allow_headers(Any);

    // Reserved `__` segments take precedence over `:id`.
    let entity_routes = Router::new()
        .route("/:entity", get(entities::list).post(entities::create))
        .route("/:entity/__query", post(entities::query))
        .route("/:entity/__count", get(entities::count))
        .route("/:entity/__distinct/:field", get(entities::distinct))
        .route(
            "/:entity/:id",
            get(entities::read)
                .put(entities::update)
                .patch(entities::update)
                .delete(entities::delete),
        )
        .route("/:entity/:id/:sub", get(entities::list_sub).post(entities::create_sub))
        .route(
            "/:entity/:id/:sub/:sub_id",
            get(entities::read_sub)
                .patch(entities::update_sub)
                .delete(entities::delete_sub),
        );

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/api", entity_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
