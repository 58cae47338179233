use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{info, warn};

use crate::{
    api::{
        dto::{Credentials, LoginRequest, LoginResponse},
        errors::AppError,
        extract::{bearer_token, Links},
        AppState,
    },
    auth::{verify_password, Caller},
    permissions::Denial,
};

const BAD_CREDENTIALS: &str = "Unable to log in with provided credentials.";

/// Exchange a username and password for a session token.
#[utoipa::path(
    post,
    path = "/api-auth/login/",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Wrong credentials"),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    links: Links,
    body: Bytes,
) -> Result<Json<LoginResponse>, AppError> {
    let creds = Credentials::parse(&body)?;

    let Some((user, hash)) = state.store.find_credentials(&creds.username).await? else {
        warn!(username = %creds.username, "login for unknown user");
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_owned()));
    };

    // CPU-bound, keep it off the async workers.
    let password = creds.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    if !valid {
        warn!(user_id = user.id, "login with wrong password");
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_owned()));
    }

    let token = state.store.create_session(user.id).await?;
    info!(user_id = user.id, "user logged in");

    Ok(Json(LoginResponse {
        token,
        user: links.user(user.id),
    }))
}

/// End the session whose token authenticated this request.
#[utoipa::path(
    post,
    path = "/api-auth/logout/",
    responses(
        (status = 204, description = "Logged out"),
        (status = 403, description = "Not authenticated"),
    ),
    security(("token" = [])),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let Some(user_id) = caller.user_id() else {
        return Err(Denial::NotAuthenticated.into());
    };
    if let Some(token) = bearer_token(&headers)? {
        state.store.delete_session(token).await?;
    }
    info!(user_id, "user logged out");

    Ok(StatusCode::NO_CONTENT)
}
