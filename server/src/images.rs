//! `/1.0/images` handlers.

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::Response;
use depot_core::error::DepotError;
use depot_core::image::ImagePutRequest;
use depot_runtime::{Access, ImageExport, ImageUpload, IngestOptions};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::response;
use crate::state::{AppState, Caller};

pub const HEADER_PUBLIC: &str = "x-lxd-public";
pub const HEADER_FILENAME: &str = "x-lxd-filename";
pub const HEADER_FINGERPRINT: &str = "x-lxd-fingerprint";
pub const HEADER_PROPERTIES: &str = "x-lxd-properties";

/// `?recursion=`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub recursion: u8,
}

/// `?secret=`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SecretQuery {
    pub secret: Option<String>,
}

impl SecretQuery {
    fn access(&self, caller: Caller) -> Access<'_> {
        if caller.trusted {
            Access::trusted()
        } else {
            Access::untrusted(self.secret.as_deref())
        }
    }
}

/// Parse a JSON request body into `T`.
pub fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| DepotError::BadRequest(format!("Invalid JSON body: {}", e)).into())
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let images = state.daemon.images();
    if query.recursion > 0 {
        Ok(response::sync(images.list_records(caller.trusted)?)?)
    } else {
        Ok(response::sync(images.list_urls(caller.trusted)?)?)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn ingest_options(headers: &HeaderMap) -> IngestOptions {
    IngestOptions {
        public: header_str(headers, HEADER_PUBLIC).is_some_and(|v| v.trim() == "1"),
        filename: header_str(headers, HEADER_FILENAME)
            .unwrap_or_default()
            .to_string(),
        expected_fingerprint: header_str(headers, HEADER_FINGERPRINT)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        property_headers: headers
            .get_all(HEADER_PROPERTIES)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect(),
    }
}

/// Stage a `metadata` + `rootfs` multipart upload. Returns the file name
/// of the rootfs part, if it carried one.
async fn stage_multipart(
    upload: &mut ImageUpload,
    mut multipart: Multipart,
) -> ApiResult<Option<String>> {
    let invalid = || DepotError::BadRequest("Invalid multipart image".into());

    let metadata = multipart
        .next_field()
        .await
        .map_err(|e| DepotError::BadRequest(e.to_string()))?
        .ok_or_else(invalid)?;
    if metadata.name() != Some("metadata") {
        return Err(invalid().into());
    }
    upload.write_metadata(metadata).await?;

    let rootfs = multipart
        .next_field()
        .await
        .map_err(|e| DepotError::BadRequest(e.to_string()))?
        .ok_or_else(invalid)?;
    if rootfs.name() != Some("rootfs") {
        return Err(invalid().into());
    }
    let filename = rootfs
        .file_name()
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    upload.write_rootfs(rootfs).await?;
    Ok(filename)
}

/// Stage the request body. Returns the rootfs file name of a split upload.
async fn stage_body(
    state: &AppState,
    upload: &mut ImageUpload,
    headers: &HeaderMap,
    request: Request,
) -> ApiResult<Option<String>> {
    let is_multipart = header_str(headers, CONTENT_TYPE.as_str())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    if !is_multipart {
        upload
            .write_tarball(request.into_body().into_data_stream())
            .await?;
        return Ok(None);
    }

    let multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| DepotError::BadRequest(e.body_text()))?;
    stage_multipart(upload, multipart).await
}

/// `POST /1.0/images`: a raw tarball, a metadata/rootfs multipart body, or a
/// JSON request to build an image from a container.
///
/// A split upload is named after its rootfs part; `X-LXD-filename` is the
/// fallback.
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    request: Request,
) -> ApiResult<Response> {
    caller.require_trusted()?;

    let ingest = state.daemon.ingest();
    let mut upload = ingest.begin()?;
    let mut options = ingest_options(&headers);

    match stage_body(&state, &mut upload, &headers, request).await {
        Ok(Some(filename)) => options.filename = filename,
        Ok(None) => {}
        Err(e) => {
            upload.discard().await;
            return Err(e);
        }
    }

    let result = ingest.ingest(upload, options).await?;
    Ok(response::sync(result)?)
}

pub async fn get(
    State(state): State<AppState>,
    caller: Caller,
    Path(fingerprint): Path<String>,
    Query(query): Query<SecretQuery>,
) -> ApiResult<Response> {
    let info = state.daemon.images().get(&fingerprint, query.access(caller))?;
    Ok(response::sync(info)?)
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(fingerprint): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let request: ImagePutRequest = parse_json(&body)?;
    state
        .daemon
        .images()
        .update_properties(&fingerprint, &request.properties)?;
    Ok(response::empty_sync())
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(fingerprint): Path<String>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let images = state.daemon.images().clone();
    tokio::task::spawn_blocking(move || images.delete(&fingerprint))
        .await
        .map_err(|e| DepotError::Internal(format!("Image deletion task failed: {}", e)))??;
    Ok(response::empty_sync())
}

pub async fn export(
    State(state): State<AppState>,
    caller: Caller,
    Path(fingerprint): Path<String>,
    Query(query): Query<SecretQuery>,
) -> ApiResult<Response> {
    let export = state
        .daemon
        .images()
        .export(&fingerprint, query.access(caller))?;

    let response = match &export {
        ImageExport::Single(file) => response::file(file).await?,
        ImageExport::Split { metadata, rootfs } => {
            response::multipart(&[("metadata", metadata), ("rootfs", rootfs)]).await?
        }
    };
    tracing::debug!(fingerprint = %fingerprint, trusted = caller.trusted, "Exporting image");
    Ok(response)
}

pub async fn secret(
    State(state): State<AppState>,
    caller: Caller,
    Path(fingerprint): Path<String>,
) -> ApiResult<Response> {
    caller.require_trusted()?;
    let op = state.daemon.images().create_secret(&fingerprint)?;
    Ok(response::async_op(&op))
}
