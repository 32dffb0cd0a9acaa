//! `/1.0/images/aliases` handlers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use depot_core::image::AliasPostRequest;

use crate::error::ApiResult;
use crate::images::{parse_json, ListQuery};
use crate::response;
use crate::state::{AppState, Caller};

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let aliases = state.daemon.aliases();
    if query.recursion > 0 {
        Ok(response::sync(aliases.list_records(caller.trusted)?)?)
    } else {
        Ok(response::sync(aliases.list_urls()?)?)
    }
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let request: AliasPostRequest = parse_json(&body)?;
    state.daemon.aliases().create(&request)?;
    Ok(response::empty_sync())
}

pub async fn get(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let alias = state.daemon.aliases().get(&name, caller.trusted)?;
    Ok(response::sync(alias)?)
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    state.daemon.aliases().delete(&name)?;
    Ok(response::empty_sync())
}
