//! Request extractors: the acting [`Caller`] and the [`Links`] used to
//! build absolute hyperlinks.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;
use url::Url;
use uuid::Uuid;

use super::{errors::AppError, AppState};
use crate::auth::Caller;

// ---------------------------------------------------------------------------
// Caller
// ---------------------------------------------------------------------------

/// Reads `Authorization: Token <uuid>` (or `Bearer`). Missing header or an
/// unknown scheme yields `Ok(None)`.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid token header.".to_owned()))?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }

    match (parts.next(), parts.next()) {
        (Some(token), None) => Uuid::parse_str(token)
            .map(Some)
            .map_err(|_| AppError::Unauthorized("Invalid token.".to_owned())),
        (None, _) => Err(AppError::Unauthorized(
            "Invalid token header. No credentials provided.".to_owned(),
        )),
        (Some(_), Some(_)) => Err(AppError::Unauthorized(
            "Invalid token header. Token string should not contain spaces.".to_owned(),
        )),
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let Some(token) = bearer_token(&parts.headers)? else {
            return Ok(Caller::Anonymous);
        };

        match state.store.session_user(token).await? {
            Some(user) => Ok(Caller::User(user)),
            None => Err(AppError::Unauthorized("Invalid token.".to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Absolute URL builder for the current request.
#[derive(Debug, Clone)]
pub struct Links {
    base: String,
    base_path: String,
    current: Url,
}

impl Links {
    pub fn new(base: &str, path_and_query: &str) -> Result<Self, AppError> {
        let base = base.trim_end_matches('/').to_owned();
        let current = Url::parse(&format!("{base}{path_and_query}"))
            .map_err(|_| AppError::BadRequest("Invalid host header.".to_owned()))?;
        let base_path = Url::parse(&base)
            .map(|url| url.path().trim_end_matches('/').to_owned())
            .unwrap_or_default();
        Ok(Self {
            base,
            base_path,
            current,
        })
    }

    /// Path component of the base URL without a trailing slash, e.g. `/api`.
    /// Empty when hyperlinks are served from the host root.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}{path}", self.base)
    }

    pub fn users(&self) -> String {
        self.absolute("/users/")
    }

    pub fn user(&self, id: i64) -> String {
        format!("{}/users/{id}/", self.base)
    }

    pub fn hydroponics_list(&self) -> String {
        self.absolute("/hydroponics/")
    }

    pub fn hydroponics(&self, id: i64) -> String {
        format!("{}/hydroponics/{id}/", self.base)
    }

    pub fn readings(&self) -> String {
        self.absolute("/sensor_readings/")
    }

    pub fn reading(&self, id: i64) -> String {
        format!("{}/sensor_readings/{id}/", self.base)
    }

    /// The current URL with `page` replaced, or removed when `None`. All
    /// other query parameters are kept in their original order.
    pub fn with_page(&self, page: Option<u64>) -> String {
        let mut url = self.current.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() && page.is_none() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            if let Some(page) = page {
                pairs.append_pair("page", &page.to_string());
            }
        }
        url.to_string()
    }
}

impl FromRequestParts<AppState> for Links {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let base = match &state.settings.public_base_url {
            Some(base) => base.clone(),
            None => request_origin(&parts.headers, &state.settings.allowed_hosts)?,
        };
        Links::new(&base, path_and_query)
    }
}

/// `scheme://host` taken from the request. The `Host` header must name one of
/// `allowed_hosts`; a missing header means `localhost`.
fn request_origin(headers: &HeaderMap, allowed_hosts: &[String]) -> Result<String, AppError> {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|v| matches!(*v, "http" | "https"))
        .unwrap_or("http");
    let host = match headers.get(header::HOST) {
        None => "localhost",
        Some(value) => value.to_str().unwrap_or_default(),
    };

    if !host_allowed(host, allowed_hosts) {
        warn!(host = %host.escape_debug(), "rejected request for disallowed host");
        return Err(AppError::BadRequest("Invalid host header.".to_owned()));
    }
    Ok(format!("{scheme}://{host}"))
}

fn host_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    let name = match host.strip_prefix('[') {
        Some(rest) => match rest.split_once(']') {
            Some((addr, _)) => &host[..addr.len() + 2],
            None => return false,
        },
        None => host.split(':').next().unwrap_or_default(),
    };
    if name.is_empty() {
        return false;
    }
    let name = name.to_ascii_lowercase();

    allowed_hosts.iter().any(|pattern| {
        pattern == "*"
            || *pattern == name
            || pattern
                .strip_prefix('.')
                .is_some_and(|domain| name == domain || name.ends_with(pattern.as_str()))
    })
}
