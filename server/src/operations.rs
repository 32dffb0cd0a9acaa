//! `/1.0/operations` handlers.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use depot_core::error::DepotError;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::response;
use crate::state::{AppState, Caller};

/// `?timeout=` in seconds; negative waits forever.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WaitQuery {
    pub timeout: i64,
}

impl Default for WaitQuery {
    fn default() -> Self {
        Self { timeout: -1 }
    }
}

fn parse_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id)
        .map_err(|_| DepotError::NotFound(format!("operation {}", id)).into())
}

pub async fn list(State(state): State<AppState>, caller: Caller) -> ApiResult<Response> {
    caller.require_trusted()?;
    let urls: Vec<String> = state
        .daemon
        .operations()
        .list()
        .iter()
        .map(|op| op.url())
        .collect();
    Ok(response::sync(urls)?)
}

pub async fn get(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let op = state.daemon.operations().get(&parse_id(&id)?)?;
    Ok(response::sync(op)?)
}

/// Cancel an operation. Any secret it carries stops being honoured.
pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let op = state.daemon.operations().cancel(&parse_id(&id)?)?;
    tracing::info!(operation = %op.id, "Operation cancelled");
    Ok(response::empty_sync())
}

pub async fn wait(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let timeout = u64::try_from(query.timeout).ok().map(Duration::from_secs);
    let op = state
        .daemon
        .operations()
        .wait(&parse_id(&id)?, timeout)
        .await?;
    Ok(response::sync(op)?)
}
