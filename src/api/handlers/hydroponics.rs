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
        dto::{HydroponicsDto, HydroponicsInput, HydroponicsRequest},
        errors::AppError,
        extract::Links,
        pagination::{paginate, PageRequest, Paginated},
        AppState,
    },
    auth::Caller,
    db::models::{Hydroponics, HydroponicsChanges, NewHydroponics, DEFAULT_SYSTEM_NAME},
    filter::HYDROPONICS,
    permissions::{Action, Denial, Policy},
};

/// Number of reading links embedded in a system representation.
pub const RECENT_READINGS: u64 = 10;

const POLICY: Policy = Policy::hydroponics();

/// Attaches the newest reading links to each system.
async fn represent(
    state: &AppState,
    systems: Vec<Hydroponics>,
    links: &Links,
) -> Result<Vec<HydroponicsDto>, AppError> {
    let ids: Vec<i64> = systems.iter().map(|s| s.id).collect();
    let mut recent = state.store.recent_reading_ids(&ids, RECENT_READINGS).await?;

    Ok(systems
        .into_iter()
        .map(|s| {
            let readings = recent.remove(&s.id).unwrap_or_default();
            HydroponicsDto::new(s, &readings, links)
        })
        .collect())
}

async fn represent_one(
    state: &AppState,
    system: Hydroponics,
    links: &Links,
) -> Result<HydroponicsDto, AppError> {
    let mut dtos = represent(state, vec![system], links).await?;
    dtos.pop()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("representation dropped a system")))
}

async fn load(state: &AppState, id: i64) -> Result<Hydroponics, AppError> {
    state
        .store
        .get_hydroponics(id)
        .await?
        .ok_or_else(AppError::not_found)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List systems, filtered and ordered by query parameters.
#[utoipa::path(
    get,
    path = "/hydroponics/",
    params(
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("ordering" = Option<String>, Query, description = "Comma-separated fields among id, created, name, owner; prefix with - for descending"),
        ("id" = Option<i64>, Query), ("id__gte" = Option<i64>, Query), ("id__lte" = Option<i64>, Query),
        ("name" = Option<String>, Query), ("name__icontains" = Option<String>, Query), ("name__istartswith" = Option<String>, Query),
        ("owner__username" = Option<String>, Query), ("owner__username__icontains" = Option<String>, Query), ("owner__username__istartswith" = Option<String>, Query),
        ("created_after" = Option<String>, Query, description = "Date or RFC 3339 timestamp, inclusive"),
        ("created_before" = Option<String>, Query, description = "Date or RFC 3339 timestamp, inclusive"),
    ),
    responses(
        (status = 200, description = "One page of systems", body = Paginated<HydroponicsDto>),
        (status = 400, description = "Malformed filter value"),
        (status = 404, description = "Invalid page"),
    ),
    tag = "hydroponics"
)]
pub async fn list_hydroponics(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Paginated<HydroponicsDto>>, AppError> {
    POLICY.check(&caller, Action::List)?;

    let page = PageRequest::from_params(&params, state.settings.page_size)?;
    let query = list_query(&HYDROPONICS, &params, page)?;
    let listed = state.store.list_hydroponics(&query).await?;
    let results = represent(&state, listed.items, &links).await?;

    Ok(Json(paginate(page, listed.total, results, &links)?))
}

/// Create a system owned by the caller. Any `owner` in the body is ignored.
#[utoipa::path(
    post,
    path = "/hydroponics/",
    request_body = HydroponicsRequest,
    responses(
        (status = 201, description = "Created", body = HydroponicsDto),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Not authenticated"),
    ),
    security(("token" = [])),
    tag = "hydroponics"
)]
pub async fn create_hydroponics(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    body: Bytes,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<HydroponicsDto>), AppError> {
    POLICY.check(&caller, Action::Create)?;
    let owner = caller.user().ok_or(Denial::NotAuthenticated)?;

    let input = HydroponicsInput::parse(&body)?;
    let name = input
        .name
        .into_value()
        .unwrap_or_else(|| DEFAULT_SYSTEM_NAME.to_owned());

    let system = state
        .store
        .create_hydroponics(NewHydroponics {
            owner_id: owner.id,
            name,
        })
        .await?;
    info!(user_id = owner.id, hydroponics_id = system.id, "hydroponics created");

    let dto = HydroponicsDto::new(system, &[], &links);
    Ok((StatusCode::CREATED, [(header::LOCATION, dto.url.clone())], Json(dto)))
}

#[utoipa::path(
    get,
    path = "/hydroponics/{id}/",
    params(("id" = i64, Path, description = "System id")),
    responses(
        (status = 200, description = "The system", body = HydroponicsDto),
        (status = 404, description = "Unknown system"),
    ),
    tag = "hydroponics"
)]
pub async fn get_hydroponics(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
) -> Result<Json<HydroponicsDto>, AppError> {
    POLICY.check(&caller, Action::Retrieve)?;
    let system = load(&state, id).await?;
    POLICY.check_object(&caller, Action::Retrieve, system.owner_id)?;

    Ok(Json(represent_one(&state, system, &links).await?))
}

async fn update(
    state: AppState,
    caller: Caller,
    links: Links,
    id: i64,
    body: Bytes,
    action: Action,
) -> Result<Json<HydroponicsDto>, AppError> {
    POLICY.check(&caller, action)?;
    let system = load(&state, id).await?;
    POLICY.check_object(&caller, action, system.owner_id)?;

    let input = HydroponicsInput::parse(&body)?;
    let changes = HydroponicsChanges {
        name: input.name.into_value(),
    };
    let system = state
        .store
        .update_hydroponics(id, changes)
        .await?
        .ok_or_else(AppError::not_found)?;
    info!(user_id = ?caller.user_id(), hydroponics_id = id, "hydroponics updated");

    Ok(Json(represent_one(&state, system, &links).await?))
}

/// Full update. Only the owner may modify a system.
#[utoipa::path(
    put,
    path = "/hydroponics/{id}/",
    params(("id" = i64, Path, description = "System id")),
    request_body = HydroponicsRequest,
    responses(
        (status = 200, description = "Updated", body = HydroponicsDto),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Unknown system"),
    ),
    security(("token" = [])),
    tag = "hydroponics"
)]
pub async fn replace_hydroponics(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<HydroponicsDto>, AppError> {
    update(state, caller, links, id, body, Action::Update).await
}

/// Partial update. Only the owner may modify a system.
#[utoipa::path(
    patch,
    path = "/hydroponics/{id}/",
    params(("id" = i64, Path, description = "System id")),
    request_body = HydroponicsRequest,
    responses(
        (status = 200, description = "Updated", body = HydroponicsDto),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Unknown system"),
    ),
    security(("token" = [])),
    tag = "hydroponics"
)]
pub async fn patch_hydroponics(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<HydroponicsDto>, AppError> {
    update(state, caller, links, id, body, Action::PartialUpdate).await
}

/// Delete a system and all of its readings.
#[utoipa::path(
    delete,
    path = "/hydroponics/{id}/",
    params(("id" = i64, Path, description = "System id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Unknown system"),
    ),
    security(("token" = [])),
    tag = "hydroponics"
)]
pub async fn delete_hydroponics(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    POLICY.check(&caller, Action::Destroy)?;
    let system = load(&state, id).await?;
    POLICY.check_object(&caller, Action::Destroy, system.owner_id)?;

    if !state.store.delete_hydroponics(id).await? {
        return Err(AppError::not_found());
    }
    info!(user_id = ?caller.user_id(), hydroponics_id = id, "hydroponics deleted");

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
