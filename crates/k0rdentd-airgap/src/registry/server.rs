//! OCI distribution HTTP surface over [`BlobStore`]
//!
//! Covers what `skopeo copy` needs to push and what containerd needs to
//! pull: the API version check, blob HEAD/GET, chunked and monolithic
//! uploads, manifest HEAD/GET/PUT by tag or digest, and tag listing.

use super::storage::{BlobStore, StoreError, is_digest};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

const API_VERSION_HEADER: &str = "docker-distribution-api-version";
const CONTENT_DIGEST_HEADER: &str = "docker-content-digest";
const UPLOAD_UUID_HEADER: &str = "docker-upload-uuid";
const MAX_MANIFEST_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(Clone)]
pub struct RegistryState {
    pub store: Arc<BlobStore>,
}

/// Registry error in the OCI error envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn blob_unknown(digest: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "BLOB_UNKNOWN", format!("blob unknown: {}", digest))
    }

    fn manifest_unknown(reference: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "MANIFEST_UNKNOWN",
            format!("manifest unknown: {}", reference),
        )
    }

    fn unsupported() -> Self {
        Self::new(StatusCode::NOT_FOUND, "UNSUPPORTED", "unsupported operation")
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let (status, code) = match &e {
            StoreError::InvalidDigest(_) | StoreError::DigestMismatch { .. } => {
                (StatusCode::BAD_REQUEST, "DIGEST_INVALID")
            }
            StoreError::InvalidName(_) => (StatusCode::BAD_REQUEST, "NAME_INVALID"),
            StoreError::InvalidTag(_) => (StatusCode::BAD_REQUEST, "TAG_INVALID"),
            StoreError::UploadUnknown(_) => (StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN"),
            StoreError::Stream(_) => (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID"),
            StoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN"),
        };
        if status.is_server_error() {
            tracing::error!("Registry storage error: {}", e);
        }
        Self::new(status, code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "errors": [{ "code": self.code, "message": self.message }]
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    digest: Option<String>,
}

/// What a `/v2/<name>/...` path addresses
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Blob { name: &'a str, digest: &'a str },
    StartUpload { name: &'a str },
    Upload { name: &'a str, id: &'a str },
    Manifest { name: &'a str, reference: &'a str },
    Tags { name: &'a str },
}

/// Repository names contain slashes, so the path is split from the right
fn parse_route(path: &str) -> Option<Route<'_>> {
    let rest = path.strip_prefix("/v2/")?;

    if let Some(name) = rest.strip_suffix("/tags/list") {
        return Some(Route::Tags { name });
    }
    if let Some(name) = rest
        .strip_suffix("/blobs/uploads/")
        .or_else(|| rest.strip_suffix("/blobs/uploads"))
    {
        return Some(Route::StartUpload { name });
    }
    if let Some(idx) = rest.rfind("/blobs/uploads/") {
        return Some(Route::Upload {
            name: &rest[..idx],
            id: &rest[idx + "/blobs/uploads/".len()..],
        });
    }
    if let Some(idx) = rest.rfind("/blobs/") {
        return Some(Route::Blob {
            name: &rest[..idx],
            digest: &rest[idx + "/blobs/".len()..],
        });
    }
    if let Some(idx) = rest.rfind("/manifests/") {
        return Some(Route::Manifest {
            name: &rest[..idx],
            reference: &rest[idx + "/manifests/".len()..],
        });
    }
    None
}

pub fn router(store: Arc<BlobStore>) -> Router {
    Router::new()
        .route("/v2/", get(api_version))
        .route("/v2", get(api_version))
        .route("/v2/{*path}", any(dispatch))
        .with_state(RegistryState { store })
}

async fn api_version() -> impl IntoResponse {
    (
        [(API_VERSION_HEADER, "registry/2.0")],
        Json(serde_json::json!({})),
    )
}

async fn dispatch(
    State(state): State<RegistryState>,
    method: Method,
    uri: Uri,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path = uri.path().to_string();
    tracing::debug!("Registry request: {} {}", method, path);

    let Some(route) = parse_route(&path) else {
        return ApiError::unsupported().into_response();
    };

    let store = &state.store;
    let result = match (method, route) {
        (Method::GET, Route::Blob { digest, .. }) => get_blob(store, digest, true).await,
        (Method::HEAD, Route::Blob { digest, .. }) => get_blob(store, digest, false).await,
        (Method::POST, Route::StartUpload { name }) => {
            start_upload(store, name, query.digest.as_deref(), body).await
        }
        (Method::PATCH, Route::Upload { name, id }) => patch_upload(store, name, id, body).await,
        (Method::PUT, Route::Upload { name, id }) => {
            finish_upload(store, name, id, query.digest.as_deref(), body).await
        }
        (Method::GET, Route::Upload { name, id }) => upload_status(store, name, id).await,
        (Method::DELETE, Route::Upload { id, .. }) => store
            .cancel_upload(id)
            .await
            .map(|()| StatusCode::NO_CONTENT.into_response())
            .map_err(ApiError::from),
        (Method::GET, Route::Manifest { name, reference }) => {
            get_manifest(store, name, reference, true).await
        }
        (Method::HEAD, Route::Manifest { name, reference }) => {
            get_manifest(store, name, reference, false).await
        }
        (Method::PUT, Route::Manifest { name, reference }) => {
            put_manifest(store, name, reference, &headers, body).await
        }
        (Method::GET, Route::Tags { name }) => list_tags(store, name).await,
        _ => Err(ApiError::unsupported()),
    };

    result.unwrap_or_else(IntoResponse::into_response)
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn upload_location(name: &str, id: &str) -> String {
    format!("/v2/{}/blobs/uploads/{}", name, id)
}

async fn get_blob(store: &BlobStore, digest: &str, with_body: bool) -> ApiResult {
    let size = store
        .blob_size(digest)
        .await?
        .ok_or_else(|| ApiError::blob_unknown(digest))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, header_value(size));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_DIGEST_HEADER, header_value(digest));

    if !with_body {
        return Ok((StatusCode::OK, headers).into_response());
    }

    let file = tokio::fs::File::open(store.blob_path(digest)?)
        .await
        .map_err(StoreError::from)?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn start_upload(
    store: &BlobStore,
    name: &str,
    digest: Option<&str>,
    body: Body,
) -> ApiResult {
    let id = store.start_upload().await?;

    // Monolithic upload: the whole blob arrives with the POST
    if let Some(digest) = digest {
        store.append_upload(&id, body.into_data_stream()).await?;
        store.finish_upload(&id, digest).await?;
        return Ok(blob_created(name, digest));
    }

    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, header_value(upload_location(name, &id)));
    headers.insert(UPLOAD_UUID_HEADER, header_value(&id));
    headers.insert(header::RANGE, HeaderValue::from_static("0-0"));
    Ok((StatusCode::ACCEPTED, headers).into_response())
}

fn upload_progress(name: &str, id: &str, size: u64, status: StatusCode) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, header_value(upload_location(name, id)));
    headers.insert(UPLOAD_UUID_HEADER, header_value(id));
    headers.insert(header::RANGE, header_value(format!("0-{}", size.saturating_sub(1))));
    (status, headers).into_response()
}

async fn patch_upload(store: &BlobStore, name: &str, id: &str, body: Body) -> ApiResult {
    let size = store.append_upload(id, body.into_data_stream()).await?;
    Ok(upload_progress(name, id, size, StatusCode::ACCEPTED))
}

async fn upload_status(store: &BlobStore, name: &str, id: &str) -> ApiResult {
    let size = store.upload_size(id).await?;
    Ok(upload_progress(name, id, size, StatusCode::NO_CONTENT))
}

async fn finish_upload(
    store: &BlobStore,
    name: &str,
    id: &str,
    digest: Option<&str>,
    body: Body,
) -> ApiResult {
    let digest = digest.ok_or_else(|| {
        ApiError::new(StatusCode::BAD_REQUEST, "DIGEST_INVALID", "digest parameter missing")
    })?;
    store.append_upload(id, body.into_data_stream()).await?;
    store.finish_upload(id, digest).await?;
    Ok(blob_created(name, digest))
}

fn blob_created(name: &str, digest: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        header_value(format!("/v2/{}/blobs/{}", name, digest)),
    );
    headers.insert(CONTENT_DIGEST_HEADER, header_value(digest));
    (StatusCode::CREATED, headers).into_response()
}

async fn get_manifest(store: &BlobStore, name: &str, reference: &str, with_body: bool) -> ApiResult {
    let manifest = store
        .get_manifest(name, reference)
        .await?
        .ok_or_else(|| ApiError::manifest_unknown(reference))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(&manifest.media_type));
    headers.insert(header::CONTENT_LENGTH, header_value(manifest.content.len()));
    headers.insert(CONTENT_DIGEST_HEADER, header_value(&manifest.digest));

    if with_body {
        Ok((StatusCode::OK, headers, manifest.content).into_response())
    } else {
        Ok((StatusCode::OK, headers).into_response())
    }
}

async fn put_manifest(
    store: &BlobStore,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Body,
) -> ApiResult {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_MANIFEST_TYPE)
        .to_string();
    let content = axum::body::to_bytes(body, MAX_MANIFEST_SIZE)
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "MANIFEST_INVALID", e.to_string()))?;

    let digest = store
        .put_manifest(name, reference, &media_type, content)
        .await?;
    tracing::info!(
        "Stored {}{}{}",
        name,
        if is_digest(reference) { "@" } else { ":" },
        reference
    );

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::LOCATION,
        header_value(format!("/v2/{}/manifests/{}", name, digest)),
    );
    response_headers.insert(CONTENT_DIGEST_HEADER, header_value(&digest));
    Ok((StatusCode::CREATED, response_headers).into_response())
}

async fn list_tags(store: &BlobStore, name: &str) -> ApiResult {
    let tags = store.tags(name).await?.ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NAME_UNKNOWN",
            format!("repository name not known to registry: {}", name),
        )
    })?;
    Ok(Json(serde_json::json!({ "name": name, "tags": tags })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::storage::digest_of;
    use tempfile::tempdir;

    #[test]
    fn test_parse_routes() {
        assert_eq!(
            parse_route("/v2/k0sproject/k0s/manifests/v1.32.8"),
            Some(Route::Manifest {
                name: "k0sproject/k0s",
                reference: "v1.32.8"
            })
        );
        assert_eq!(
            parse_route("/v2/a/b/c/blobs/uploads/"),
            Some(Route::StartUpload { name: "a/b/c" })
        );
        assert_eq!(
            parse_route("/v2/a/blobs/uploads/1234"),
            Some(Route::Upload { name: "a", id: "1234" })
        );
        assert_eq!(
            parse_route("/v2/a/blobs/sha256:abc"),
            Some(Route::Blob {
                name: "a",
                digest: "sha256:abc"
            })
        );
        assert_eq!(
            parse_route("/v2/library/busybox/tags/list"),
            Some(Route::Tags {
                name: "library/busybox"
            })
        );
        assert_eq!(parse_route("/v2/_catalog"), None);
    }

    async fn serve() -> (String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(BlobStore::open(dir.path()).await.unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(store)).await.unwrap();
        });
        (format!("http://{}", addr), dir)
    }

    #[tokio::test]
    async fn test_push_and_pull_round_trip() {
        let (base, _dir) = serve().await;
        let client = reqwest::Client::new();

        let ping = client.get(format!("{}/v2/", base)).send().await.unwrap();
        assert_eq!(ping.status(), 200);
        assert_eq!(ping.headers()[API_VERSION_HEADER], "registry/2.0");

        // Chunked blob upload
        let layer = b"layer-content".to_vec();
        let digest = digest_of(&layer);
        let started = client
            .post(format!("{}/v2/library/app/blobs/uploads/", base))
            .send()
            .await
            .unwrap();
        assert_eq!(started.status(), 202);
        let location = started.headers()[header::LOCATION].to_str().unwrap().to_string();

        let patched = client
            .patch(format!("{}{}", base, location))
            .body(layer.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(patched.status(), 202);
        assert_eq!(patched.headers()[header::RANGE], "0-12");

        let finished = client
            .put(format!("{}{}?digest={}", base, location, digest))
            .send()
            .await
            .unwrap();
        assert_eq!(finished.status(), 201);

        let head = client
            .head(format!("{}/v2/library/app/blobs/{}", base, digest))
            .send()
            .await
            .unwrap();
        assert_eq!(head.status(), 200);
        assert_eq!(head.headers()[header::CONTENT_LENGTH], "13");

        // Manifest by tag
        let manifest = br#"{"schemaVersion":2,"layers":[]}"#.to_vec();
        let put = client
            .put(format!("{}/v2/library/app/manifests/1.0", base))
            .header(header::CONTENT_TYPE, DEFAULT_MANIFEST_TYPE)
            .body(manifest.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), 201);
        assert_eq!(put.headers()[CONTENT_DIGEST_HEADER], digest_of(&manifest).as_str());

        let pulled = client
            .get(format!("{}/v2/library/app/manifests/1.0", base))
            .send()
            .await
            .unwrap();
        assert_eq!(pulled.status(), 200);
        assert_eq!(pulled.headers()[header::CONTENT_TYPE], DEFAULT_MANIFEST_TYPE);
        assert_eq!(pulled.bytes().await.unwrap().to_vec(), manifest);

        let blob = client
            .get(format!("{}/v2/library/app/blobs/{}", base, digest))
            .send()
            .await
            .unwrap();
        assert_eq!(blob.bytes().await.unwrap().to_vec(), layer);

        let tags: serde_json::Value = client
            .get(format!("{}/v2/library/app/tags/list", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tags["tags"], serde_json::json!(["1.0"]));
    }

    #[tokio::test]
    async fn test_monolithic_upload_with_wrong_digest_is_rejected() {
        let (base, _dir) = serve().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!(
                "{}/v2/library/app/blobs/uploads/?digest={}",
                base,
                digest_of(b"other")
            ))
            .body("content")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "DIGEST_INVALID");
    }

    #[tokio::test]
    async fn test_unknown_manifest_is_404() {
        let (base, _dir) = serve().await;
        let response = reqwest::get(format!("{}/v2/library/none/manifests/latest", base))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
