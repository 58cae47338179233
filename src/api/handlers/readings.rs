use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use tracing::info;

use super::list_query;
use crate::{
    api::{
        dto::{SensorReadingDto, SensorReadingInput, SensorReadingRequest},
        errors::AppError,
        extract::Links,
        pagination::{paginate, PageRequest, Paginated},
        AppState,
    },
    auth::Caller,
    db::models::{NewSensorReading, SensorReading, SensorReadingChanges},
    filter::SENSOR_READINGS,
    permissions::{Action, Policy},
    validation::{Patch, REQUIRED},
};

fn policy(state: &AppState) -> Policy {
    Policy::sensor_readings(state.settings.reading_write_policy)
}

async fn load(state: &AppState, id: i64) -> Result<SensorReading, AppError> {
    state
        .store
        .get_reading(id)
        .await?
        .ok_or_else(AppError::not_found)
}

/// List readings, filtered and ordered by query parameters.
#[utoipa::path(
    get,
    path = "/sensor_readings/",
    params(
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("ordering" = Option<String>, Query, description = "Comma-separated fields among id, created, hydroponics, ph, temperature, tds; prefix with - for descending"),
        ("id" = Option<i64>, Query), ("id__gte" = Option<i64>, Query), ("id__lte" = Option<i64>, Query),
        ("hydroponics__name" = Option<String>, Query),
        ("hydroponics__name__icontains" = Option<String>, Query),
        ("hydroponics__name__istartswith" = Option<String>, Query),
        ("ph" = Option<f64>, Query), ("ph__gte" = Option<f64>, Query), ("ph__lte" = Option<f64>, Query),
        ("temperature" = Option<f64>, Query), ("temperature__gte" = Option<f64>, Query), ("temperature__lte" = Option<f64>, Query),
        ("tds" = Option<f64>, Query), ("tds__gte" = Option<f64>, Query), ("tds__lte" = Option<f64>, Query),
        ("created_after" = Option<String>, Query, description = "Date or RFC 3339 timestamp, inclusive"),
        ("created_before" = Option<String>, Query, description = "Date or RFC 3339 timestamp, inclusive"),
    ),
    responses(
        (status = 200, description = "One page of readings", body = Paginated<SensorReadingDto>),
        (status = 400, description = "Malformed filter value"),
        (status = 404, description = "Invalid page"),
    ),
    tag = "sensor_readings"
)]
pub async fn list_readings(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Paginated<SensorReadingDto>>, AppError> {
    policy(&state).check(&caller, Action::List)?;

    let page = PageRequest::from_params(&params, state.settings.page_size)?;
    let query = list_query(&SENSOR_READINGS, &params, page)?;
    let listed = state.store.list_readings(&query).await?;
    let results = listed
        .items
        .into_iter()
        .map(|r| SensorReadingDto::new(r, &links))
        .collect();

    Ok(Json(paginate(page, listed.total, results, &links)?))
}

/// Record a reading against an existing system. Omitted measurements are
/// stored as null.
#[utoipa::path(
    post,
    path = "/sensor_readings/",
    request_body = SensorReadingRequest,
    responses(
        (status = 201, description = "Created", body = SensorReadingDto),
        (status = 400, description = "Validation failure or unknown system"),
        (status = 403, description = "Not authenticated"),
    ),
    security(("token" = [])),
    tag = "sensor_readings"
)]
pub async fn create_reading(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    body: Bytes,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<SensorReadingDto>), AppError> {
    policy(&state).check(&caller, Action::Create)?;

    let input = SensorReadingInput::parse(&body, true, &links)?;
    let Patch::Value(hydroponics_id) = input.hydroponics else {
        return Err(AppError::field("hydroponics", REQUIRED));
    };

    let reading = state
        .store
        .create_reading(NewSensorReading {
            hydroponics_id,
            ph: input.ph.into_value(),
            temperature: input.temperature.into_value(),
            tds: input.tds.into_value(),
        })
        .await?;
    info!(
        user_id = ?caller.user_id(),
        hydroponics_id,
        reading_id = reading.id,
        "sensor reading created"
    );

    let dto = SensorReadingDto::new(reading, &links);
    Ok((StatusCode::CREATED, [(header::LOCATION, dto.url.clone())], Json(dto)))
}

#[utoipa::path(
    get,
    path = "/sensor_readings/{id}/",
    params(("id" = i64, Path, description = "Reading id")),
    responses(
        (status = 200, description = "The reading", body = SensorReadingDto),
        (status = 404, description = "Unknown reading"),
    ),
    tag = "sensor_readings"
)]
pub async fn get_reading(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
) -> Result<Json<SensorReadingDto>, AppError> {
    let policy = policy(&state);
    policy.check(&caller, Action::Retrieve)?;
    let reading = load(&state, id).await?;
    policy.check_object(&caller, Action::Retrieve, reading.owner_id)?;

    Ok(Json(SensorReadingDto::new(reading, &links)))
}

async fn update(
    state: AppState,
    caller: Caller,
    links: Links,
    id: i64,
    body: Bytes,
    action: Action,
) -> Result<Json<SensorReadingDto>, AppError> {
    let policy = policy(&state);
    policy.check(&caller, action)?;
    let current = load(&state, id).await?;
    policy.check_object(&caller, action, current.owner_id)?;

    let input = SensorReadingInput::parse(&body, action == Action::Update, &links)?;
    if let Patch::Value(parent) = input.hydroponics {
        if parent != current.hydroponics_id {
            return Err(AppError::field(
                "hydroponics",
                "The system of an existing reading cannot be changed.",
            ));
        }
    }

    let changes = SensorReadingChanges {
        ph: input.ph.into_change(),
        temperature: input.temperature.into_change(),
        tds: input.tds.into_change(),
    };
    let reading = state
        .store
        .update_reading(id, changes)
        .await?
        .ok_or_else(AppError::not_found)?;
    info!(user_id = ?caller.user_id(), reading_id = id, "sensor reading updated");

    Ok(Json(SensorReadingDto::new(reading, &links)))
}

/// Full update. `hydroponics` is required and must name the current system.
#[utoipa::path(
    put,
    path = "/sensor_readings/{id}/",
    params(("id" = i64, Path, description = "Reading id")),
    request_body = SensorReadingRequest,
    responses(
        (status = 200, description = "Updated", body = SensorReadingDto),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Unknown reading"),
    ),
    security(("token" = [])),
    tag = "sensor_readings"
)]
pub async fn replace_reading(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<SensorReadingDto>, AppError> {
    update(state, caller, links, id, body, Action::Update).await
}

/// Partial update. An explicit `null` clears a measurement.
#[utoipa::path(
    patch,
    path = "/sensor_readings/{id}/",
    params(("id" = i64, Path, description = "Reading id")),
    request_body = SensorReadingRequest,
    responses(
        (status = 200, description = "Updated", body = SensorReadingDto),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Unknown reading"),
    ),
    security(("token" = [])),
    tag = "sensor_readings"
)]
pub async fn patch_reading(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<SensorReadingDto>, AppError> {
    update(state, caller, links, id, body, Action::PartialUpdate).await
}

#[utoipa::path(
    delete,
    path = "/sensor_readings/{id}/",
    params(("id" = i64, Path, description = "Reading id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Unknown reading"),
    ),
    security(("token" = [])),
    tag = "sensor_readings"
)]
pub async fn delete_reading(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let policy = policy(&state);
    policy.check(&caller, Action::Destroy)?;
    let reading = load(&state, id).await?;
    policy.check_object(&caller, Action::Destroy, reading.owner_id)?;

    if !state.store.delete_reading(id).await? {
        return Err(AppError::not_found());
    }
    info!(user_id = ?caller.user_id(), reading_id = id, "sensor reading deleted");

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
