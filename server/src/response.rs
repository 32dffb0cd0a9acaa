//! Response builders: JSON envelopes, file downloads and two-part exports.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use depot_core::error::{DepotError, Result};
use depot_core::{ApiResponse, Operation};
use depot_runtime::ExportFile;
use futures::{stream, StreamExt};
use serde::Serialize;
use tokio_util::io::ReaderStream;

/// `200` with a sync envelope around `metadata`.
pub fn sync<T: Serialize>(metadata: T) -> Result<Response> {
    let value = serde_json::to_value(metadata)?;
    Ok((StatusCode::OK, Json(ApiResponse::sync(value))).into_response())
}

/// `200` with an empty sync envelope.
pub fn empty_sync() -> Response {
    (StatusCode::OK, Json(ApiResponse::empty_sync())).into_response()
}

/// `202` pointing at a background operation.
pub fn async_op(op: &Operation) -> Response {
    let mut response = (StatusCode::ACCEPTED, Json(ApiResponse::async_op(op))).into_response();
    if let Ok(location) = HeaderValue::from_str(&op.url()) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

async fn open(file: &ExportFile) -> Result<(tokio::fs::File, u64)> {
    let handle = tokio::fs::File::open(&file.path).await.map_err(|e| {
        DepotError::Internal(format!("Failed to open {}: {}", file.path.display(), e))
    })?;
    let len = handle.metadata().await?.len();
    Ok((handle, len))
}

fn disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename.replace('"', ""))
}

/// Stream a single file.
pub async fn file(file: &ExportFile) -> Result<Response> {
    let (handle, len) = open(file).await?;
    let body = Body::from_stream(ReaderStream::new(handle));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) = HeaderValue::from_str(&disposition(&file.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Stream several files as one `multipart/form-data` body, one part per
/// `(name, file)`.
pub async fn multipart(parts: &[(&str, &ExportFile)]) -> Result<Response> {
    let boundary = uuid::Uuid::new_v4().simple().to_string();

    let mut body = stream::empty().boxed();
    for (name, file) in parts {
        let (handle, _) = open(file).await?;
        let head = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            boundary,
            name,
            file.filename.replace('"', "")
        );
        body = body
            .chain(stream::iter([Ok(Bytes::from(head))]))
            .chain(ReaderStream::new(handle))
            .chain(stream::iter([Ok(Bytes::from_static(b"\r\n"))]))
            .boxed();
    }
    let tail = format!("--{}--\r\n", boundary);
    let body = body.chain(stream::iter([Ok::<_, std::io::Error>(Bytes::from(tail))]));

    let mut response = (StatusCode::OK, Body::from_stream(body)).into_response();
    let content_type = format!("multipart/form-data; boundary={}", boundary);
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
