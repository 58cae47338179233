pub mod dto;
pub mod errors;
pub mod extract;
pub mod handlers;
pub mod pagination;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    config::{parse_allowed_hosts, Config, ReadingWritePolicy, DEFAULT_ALLOWED_HOSTS},
    store::Store,
};
use handlers::{hydroponics, readings, root, session, users, ApiDoc};

/// Request-independent settings the handlers read.
#[derive(Debug, Clone)]
pub struct Settings {
    pub public_base_url: Option<String>,
    pub allowed_hosts: Vec<String>,
    pub page_size: u64,
    pub admin_url: String,
    pub reading_write_policy: ReadingWritePolicy,
    pub password_iterations: u32,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            public_base_url: config.public_base_url.clone(),
            allowed_hosts: config.allowed_hosts.clone(),
            page_size: config.page_size,
            admin_url: config.admin_url.clone(),
            reading_write_policy: config.reading_write_policy,
            password_iterations: config.password_iterations,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            public_base_url: None,
            allowed_hosts: parse_allowed_hosts(DEFAULT_ALLOWED_HOSTS),
            page_size: 10,
            admin_url: "/admin/".to_owned(),
            reading_write_policy: ReadingWritePolicy::default(),
            password_iterations: 100_000,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/", get(root::api_root))
        .route("/users/", get(users::list_users).post(users::create_user))
        .route(
            "/users/{id}/",
            get(users::get_user)
                .put(users::replace_user)
                .patch(users::patch_user)
                .delete(users::delete_user),
        )
        .route(
            "/hydroponics/",
            get(hydroponics::list_hydroponics).post(hydroponics::create_hydroponics),
        )
        .route(
            "/hydroponics/{id}/",
            get(hydroponics::get_hydroponics)
                .put(hydroponics::replace_hydroponics)
                .patch(hydroponics::patch_hydroponics)
                .delete(hydroponics::delete_hydroponics),
        )
        .route(
            "/sensor_readings/",
            get(readings::list_readings).post(readings::create_reading),
        )
        .route(
            "/sensor_readings/{id}/",
            get(readings::get_reading)
                .put(readings::replace_reading)
                .patch(readings::patch_reading)
                .delete(readings::delete_reading),
        )
        .route("/api-auth/login/", post(session::login))
        .route("/api-auth/logout/", post(session::logout))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route("/api-schema/", get(move || async move { axum::Json(api) }))
        .route("/api-docs/", get(root::api_docs))
        .layer(TraceLayer::new_for_http())
}
