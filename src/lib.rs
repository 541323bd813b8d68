pub mod auth;
pub mod config;
pub mod crud;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod services;

use axum::{
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::CONFIG;
use crate::crud::CrudError;
use crate::middleware::jwt_auth_middleware;
use crate::services::{ProfileService, ProjectMemberService, ProjectService};

/// Shared handler state: the pool and one service per resource.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub profiles: ProfileService,
    pub projects: ProjectService,
    pub members: ProjectMemberService,
}

impl AppState {
    /// Fails when a resource's declared relations do not reflect.
    pub fn new(pool: PgPool) -> Result<Self, CrudError> {
        Ok(Self {
            profiles: ProfileService::new(pool.clone())?,
            projects: ProjectService::new(pool.clone())?,
            members: ProjectMemberService::new(pool.clone())?,
            pool,
        })
    }
}

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .merge(profile_routes())
        .merge(project_routes())
        .merge(member_routes())
        .route_layer(from_fn(jwt_auth_middleware));

    let router = Router::new()
        .route("/health", get(handlers::health::health))
        .merge(protected)
        .with_state(state);

    let router = if CONFIG.api.enable_request_logging {
        router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    } else {
        router
    };

    match cors_layer() {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn profile_routes() -> Router<AppState> {
    use axum::routing::patch;
    use handlers::profiles;

    Router::new()
        .route("/profiles", get(profiles::list).post(profiles::create))
        .route("/profiles/others", get(profiles::list_others))
        .route("/profiles/me", patch(profiles::update_me))
        .route("/profiles/:username", get(profiles::show))
}

fn project_routes() -> Router<AppState> {
    use handlers::projects;

    Router::new()
        .route("/projects", get(projects::list).post(projects::create))
        .route("/projects/:id", get(projects::show).patch(projects::update).delete(projects::delete))
}

fn member_routes() -> Router<AppState> {
    use handlers::members;

    Router::new()
        .route("/projects/:id/members", get(members::list).delete(members::leave))
        .route("/projects/:id/members/join", post(members::join))
        .route("/projects/:id/members/accept", post(members::accept))
        .route("/projects/:id/members/:username", get(members::show).delete(members::kick))
        .route("/projects/:id/members/:username/invite", post(members::invite))
        .route("/projects/:id/members/:username/approve", post(members::approve))
        .route("/projects/:id/members/:username/transfer", post(members::transfer))
}

fn cors_layer() -> Option<CorsLayer> {
    let security = &CONFIG.security;
    if !security.enable_cors {
        return None;
    }
    if security.cors_origins.iter().any(|origin| origin == "*") {
        return Some(CorsLayer::permissive());
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    Some(CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any))
}
