pub mod hydroponics;
pub mod readings;
pub mod root;
pub mod session;
pub mod users;

use std::collections::HashMap;

use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use super::{
    dto::{
        ApiRootDto, HydroponicsDto, HydroponicsRequest, LoginRequest, LoginResponse,
        SensorReadingDto, SensorReadingRequest, UserDto, UserRequest,
    },
    errors::AppError,
    pagination::PageRequest,
};
use crate::{
    filter::{FilterSet, OrderBy, Predicate},
    store::ListQuery,
};

/// Builds the store query for a list endpoint from its raw query string.
pub(crate) fn list_query(
    set: &FilterSet,
    params: &HashMap<String, String>,
    page: PageRequest,
) -> Result<ListQuery, AppError> {
    let predicate = Predicate::parse(set, params)?;
    let order_by = OrderBy::parse(set, params.get("ordering").map(String::as_str));
    Ok(ListQuery {
        predicate,
        order_by,
        limit: page.size,
        offset: page.offset(),
    })
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

struct TokenAuth;

impl Modify for TokenAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "token",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "Authorization",
                "`Token <uuid>` as returned by /api-auth/login/",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        root::api_root,
        users::list_users,
        users::create_user,
        users::get_user,
        users::replace_user,
        users::patch_user,
        users::delete_user,
        hydroponics::list_hydroponics,
        hydroponics::create_hydroponics,
        hydroponics::get_hydroponics,
        hydroponics::replace_hydroponics,
        hydroponics::patch_hydroponics,
        hydroponics::delete_hydroponics,
        readings::list_readings,
        readings::create_reading,
        readings::get_reading,
        readings::replace_reading,
        readings::patch_reading,
        readings::delete_reading,
        session::login,
        session::logout,
    ),
    components(schemas(
        ApiRootDto,
        UserDto,
        UserRequest,
        HydroponicsDto,
        HydroponicsRequest,
        SensorReadingDto,
        SensorReadingRequest,
        LoginRequest,
        LoginResponse,
    )),
    modifiers(&TokenAuth),
    tags(
        (name = "users", description = "User accounts"),
        (name = "hydroponics", description = "Hydroponic systems"),
        (name = "sensor_readings", description = "Sensor readings of a hydroponic system"),
        (name = "auth", description = "Session login and logout"),
        (name = "system", description = "System endpoints"),
    ),
    info(
        title = "Hydroponics API",
        version = "0.1.0",
        description = "Sensor telemetry for user-owned hydroponic systems"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
