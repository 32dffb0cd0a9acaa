//! `GET /1.0`: server information.

use axum::extract::State;
use axum::response::Response;
use depot_core::{API_COMPAT, VERSION};
use serde::Serialize;

use crate::error::ApiResult;
use crate::response;
use crate::state::{AppState, Caller};

#[derive(Debug, Serialize)]
pub struct Environment {
    pub addresses: Vec<String>,
    pub backing_fs: String,
    pub storage: String,
    pub server_version: String,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub api_compat: u32,
    pub auth: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

pub async fn get(State(state): State<AppState>, caller: Caller) -> ApiResult<Response> {
    if !caller.trusted {
        return Ok(response::sync(ServerInfo {
            api_compat: API_COMPAT,
            auth: "untrusted",
            environment: None,
            config: None,
        })?);
    }

    let daemon = &state.daemon;
    let config = daemon.config();
    let environment = Environment {
        addresses: config.advertised_addresses(),
        backing_fs: daemon.backing_fs().to_string(),
        storage: daemon.backend_kind().to_string(),
        server_version: VERSION.to_string(),
    };

    // Tokens stay out of the document.
    let mut public_config = serde_json::to_value(config).map_err(depot_core::DepotError::from)?;
    if let Some(map) = public_config.as_object_mut() {
        map.remove("trusted_tokens");
    }

    Ok(response::sync(ServerInfo {
        api_compat: API_COMPAT,
        auth: "trusted",
        environment: Some(environment),
        config: Some(public_config),
    })?)
}
