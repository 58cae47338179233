use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use super::list_query;
use crate::{
    api::{
        dto::{UserDto, UserInput, UserRequest},
        errors::AppError,
        extract::Links,
        pagination::{paginate, PageRequest, Paginated},
        AppState,
    },
    auth::Caller,
    db::models::{User, UserChanges},
    filter::USERS,
    permissions::{Action, Denial, Policy},
};

const POLICY: Policy = Policy::users();

async fn represent(
    state: &AppState,
    users: Vec<User>,
    links: &Links,
) -> Result<Vec<UserDto>, AppError> {
    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
    let mut owned = state.store.system_ids_by_owner(&ids).await?;

    Ok(users
        .into_iter()
        .map(|u| {
            let systems = owned.remove(&u.id).unwrap_or_default();
            UserDto::new(u, &systems, links)
        })
        .collect())
}

async fn represent_one(state: &AppState, user: User, links: &Links) -> Result<UserDto, AppError> {
    let systems = state
        .store
        .system_ids_by_owner(&[user.id])
        .await?
        .remove(&user.id)
        .unwrap_or_default();
    Ok(UserDto::new(user, &systems, links))
}

/// Checks the request and object rules, then loads the target.
async fn authorize(
    state: &AppState,
    caller: &Caller,
    id: i64,
    action: Action,
) -> Result<User, AppError> {
    POLICY.check(caller, action)?;
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(AppError::not_found)?;
    POLICY.check_object(caller, action, user.id)?;
    Ok(user)
}

/// List public user profiles. Open to anonymous callers.
#[utoipa::path(
    get,
    path = "/users/",
    params(
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("ordering" = Option<String>, Query, description = "Comma-separated fields among id, date_joined, username; prefix with - for descending"),
        ("id" = Option<i64>, Query), ("id__gte" = Option<i64>, Query), ("id__lte" = Option<i64>, Query),
        ("username" = Option<String>, Query), ("username__icontains" = Option<String>, Query), ("username__istartswith" = Option<String>, Query),
        ("date_joined_after" = Option<String>, Query, description = "Date or RFC 3339 timestamp, inclusive"),
        ("date_joined_before" = Option<String>, Query, description = "Date or RFC 3339 timestamp, inclusive"),
    ),
    responses(
        (status = 200, description = "One page of users", body = Paginated<UserDto>),
        (status = 400, description = "Malformed filter value"),
        (status = 404, description = "Invalid page"),
    ),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Paginated<UserDto>>, AppError> {
    POLICY.check(&caller, Action::List)?;

    let page = PageRequest::from_params(&params, state.settings.page_size)?;
    let query = list_query(&USERS, &params, page)?;
    let listed = state.store.list_users(&query).await?;
    let results = represent(&state, listed.items, &links).await?;

    Ok(Json(paginate(page, listed.total, results, &links)?))
}

/// Always refused: accounts are created with the `create_user` tool.
#[utoipa::path(
    post,
    path = "/users/",
    request_body = UserRequest,
    responses(
        (status = 403, description = "User creation is not available over the API"),
    ),
    tag = "users"
)]
pub async fn create_user(caller: Caller) -> Result<StatusCode, AppError> {
    POLICY.check(&caller, Action::Create)?;
    Err(Denial::NotPermitted.into())
}

/// Retrieve the caller's own profile.
#[utoipa::path(
    get,
    path = "/users/{id}/",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "The user", body = UserDto),
        (status = 403, description = "Not the caller's profile"),
        (status = 404, description = "Unknown user"),
    ),
    security(("token" = [])),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
) -> Result<Json<UserDto>, AppError> {
    let user = authorize(&state, &caller, id, Action::Retrieve).await?;
    Ok(Json(represent_one(&state, user, &links).await?))
}

async fn update(
    state: AppState,
    caller: Caller,
    links: Links,
    id: i64,
    body: Bytes,
    action: Action,
) -> Result<Json<UserDto>, AppError> {
    authorize(&state, &caller, id, action).await?;

    let input = UserInput::parse(&body, action == Action::Update)?;
    let user = state
        .store
        .update_user(
            id,
            UserChanges {
                username: input.username.into_value(),
            },
        )
        .await?
        .ok_or_else(AppError::not_found)?;
    info!(user_id = id, "user updated");

    Ok(Json(represent_one(&state, user, &links).await?))
}

#[utoipa::path(
    put,
    path = "/users/{id}/",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserRequest,
    responses(
        (status = 200, description = "Updated", body = UserDto),
        (status = 400, description = "Validation failure or username taken"),
        (status = 403, description = "Not the caller's profile"),
        (status = 404, description = "Unknown user"),
    ),
    security(("token" = [])),
    tag = "users"
)]
pub async fn replace_user(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<UserDto>, AppError> {
    update(state, caller, links, id, body, Action::Update).await
}

#[utoipa::path(
    patch,
    path = "/users/{id}/",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserRequest,
    responses(
        (status = 200, description = "Updated", body = UserDto),
        (status = 400, description = "Validation failure or username taken"),
        (status = 403, description = "Not the caller's profile"),
        (status = 404, description = "Unknown user"),
    ),
    security(("token" = [])),
    tag = "users"
)]
pub async fn patch_user(
    State(state): State<AppState>,
    caller: Caller,
    links: Links,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<UserDto>, AppError> {
    update(state, caller, links, id, body, Action::PartialUpdate).await
}

/// Delete the caller's own account along with its systems and readings.
#[utoipa::path(
    delete,
    path = "/users/{id}/",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the caller's profile"),
        (status = 404, description = "Unknown user"),
    ),
    security(("token" = [])),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &caller, id, Action::Destroy).await?;

    if !state.store.delete_user(id).await? {
        return Err(AppError::not_found());
    }
    info!(user_id = id, "user deleted");

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use super::super::testing::{reading, server, system, user};
    use crate::store::Store;

    #[tokio::test]
    async fn list_is_open_to_anonymous_callers() {
        let (server, store) = server();
        let (u1, _) = user(&store, "testuser1").await;
        let sys = system(&store, u1.id, "System 1").await;

        let resp = server.get("/users/").await;
        resp.assert_status_ok();

        let body: Value = resp.json();
        assert_eq!(body["count"], 1);
        let first = &body["results"][0];
        assert_eq!(first["username"], "testuser1");
        assert_eq!(first["url"], format!("http://testserver/users/{}/", u1.id));
        assert_eq!(
            first["hydroponics"],
            json!([format!("http://testserver/hydroponics/{}/", sys.id)])
        );
        assert!(first.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn list_filters_by_username_prefix() {
        let (server, store) = server();
        user(&store, "alice").await;
        user(&store, "alfred").await;
        user(&store, "bob").await;

        let body: Value = server
            .get("/users/")
            .add_query_param("username__istartswith", "AL")
            .add_query_param("ordering", "username")
            .await
            .json();
        assert_eq!(body["count"], 2);
        assert_eq!(body["results"][0]["username"], "alfred");
        assert_eq!(body["results"][1]["username"], "alice");
    }

    #[tokio::test]
    async fn retrieve_own_profile() {
        let (server, store) = server();
        let (me, token) = user(&store, "testuser1").await;

        let resp = server
            .get(&format!("/users/{}/", me.id))
            .authorization_bearer(token)
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["username"], "testuser1");
    }

    #[tokio::test]
    async fn retrieve_requires_authentication_and_self() {
        let (server, store) = server();
        let (me, _) = user(&store, "me").await;
        let (_, other) = user(&store, "other").await;
        let path = format!("/users/{}/", me.id);

        server.get(&path).await.assert_status(StatusCode::FORBIDDEN);
        server
            .get(&path)
            .authorization_bearer(other)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_is_always_forbidden() {
        let (server, store) = server();
        let (_, token) = user(&store, "me").await;

        server
            .post("/users/")
            .json(&json!({ "username": "new" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .post("/users/")
            .authorization_bearer(token)
            .json(&json!({ "username": "new" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let body: Value = server.get("/users/").await.json();
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn patch_username() {
        let (server, store) = server();
        let (me, token) = user(&store, "me").await;
        user(&store, "taken").await;
        let path = format!("/users/{}/", me.id);

        let resp = server
            .patch(&path)
            .authorization_bearer(token.clone())
            .json(&json!({ "username": "taken" }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(
            body["fields"]["username"][0],
            "A user with that username already exists."
        );

        let resp = server
            .patch(&path)
            .authorization_bearer(token)
            .json(&json!({ "username": "renamed", "date_joined": "2000-01-01" }))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["username"], "renamed");
        assert_eq!(body["date_joined"], json!(me.date_joined));
    }

    #[tokio::test]
    async fn put_requires_username() {
        let (server, store) = server();
        let (me, token) = user(&store, "me").await;

        let resp = server
            .put(&format!("/users/{}/", me.id))
            .authorization_bearer(token)
            .json(&json!({}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(body["fields"]["username"][0], "This field is required.");
    }

    #[tokio::test]
    async fn delete_own_account_cascades() {
        let (server, store) = server();
        let (me, token) = user(&store, "me").await;
        let sys = system(&store, me.id, "S").await;
        let r = reading(&store, sys.id, Some(6.0), None, None).await;

        server
            .delete(&format!("/users/{}/", me.id))
            .authorization_bearer(token.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        assert!(store.get_hydroponics(sys.id).await.unwrap().is_none());
        assert!(store.get_reading(r.id).await.unwrap().is_none());
        // The session went with the account.
        server
            .get("/users/")
            .authorization_bearer(token)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cannot_delete_someone_else() {
        let (server, store) = server();
        let (victim, _) = user(&store, "victim").await;
        let (_, token) = user(&store, "attacker").await;

        server
            .delete(&format!("/users/{}/", victim.id))
            .authorization_bearer(token)
            .await
            .assert_status(StatusCode::FORBIDDEN);
        assert!(store.get_user(victim.id).await.unwrap().is_some());
    }
}
