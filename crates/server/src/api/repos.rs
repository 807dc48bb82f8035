use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use intake_core::Repo;

use super::{bad_request, store_error, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct RepoPage {
    pub total: i64,
    pub items: Vec<Repo>,
}

/// Ingested repositories, newest first.
pub async fn list_repos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<RepoPage>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = params.offset.unwrap_or(0);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(bad_request(format!("limit must be between 1 and {MAX_LIMIT}")));
    }
    if offset < 0 {
        return Err(bad_request("offset must not be negative"));
    }

    let total = state.stores.repos.count().await.map_err(store_error)?;
    let items = state.stores.repos.list(limit, offset).await.map_err(store_error)?;
    Ok(Json(RepoPage { total, items }))
}
