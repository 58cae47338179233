use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use super::{errors::AppError, extract::Links};

const INVALID_PAGE: &str = "Invalid page.";

/// One page of a list endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct Paginated<T> {
    /// Total number of matching items across all pages.
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based
    pub page: u64,
    pub size: u64,
}

impl PageRequest {
    pub fn from_params(params: &HashMap<String, String>, size: u64) -> Result<Self, AppError> {
        let page = match params.get("page").map(|p| p.trim()) {
            None | Some("") => 1,
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| AppError::NotFound(INVALID_PAGE.to_owned()))?,
        };
        Ok(Self {
            page,
            size: size.max(1),
        })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

/// Wraps a window of results. Asking for a page past the end is an error,
/// except for the first page of an empty result.
pub fn paginate<T>(
    request: PageRequest,
    total: u64,
    results: Vec<T>,
    links: &Links,
) -> Result<Paginated<T>, AppError> {
    if request.page > 1 && request.offset() >= total {
        return Err(AppError::NotFound(INVALID_PAGE.to_owned()));
    }

    let next = (request.page.saturating_mul(request.size) < total)
        .then(|| links.with_page(Some(request.page + 1)));
    let previous = match request.page {
        1 => None,
        2 => Some(links.with_page(None)),
        p => Some(links.with_page(Some(p - 1))),
    };

    Ok(Paginated {
        count: total,
        next,
        previous,
        results,
    })
}
