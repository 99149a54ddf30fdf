//! JSON editing API.

use super::serve::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gitwiki_core::{CallContext, Commit, ErrorKind, Heading, SiteError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;

const DEFAULT_PAGE_SIZE: usize = 25;

static COMMIT_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{4,64}$").unwrap());

/// Error body returned by every API route: `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Site(SiteError),
}

impl From<SiteError> for ApiError {
    fn from(err: SiteError) -> Self {
        ApiError::Site(err)
    }
}

pub fn status_for(err: &SiteError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Site(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = ?err, "request failed");
                } else {
                    tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
                }
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn status(value: &str) -> Json<serde_json::Value> {
    Json(json!({ "status": value }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub page: usize,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub items: Vec<Commit>,
    pub has_more: bool,
}

pub async fn api_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let page_size = params
        .page_size
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    let (items, has_more) = state
        .service
        .history(&CallContext::background(), &params.path, params.page, page_size)
        .await?;
    Ok(Json(HistoryResponse { items, has_more }))
}

#[derive(Debug, Deserialize)]
pub struct DiffParams {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

fn validate_ref(name: &str, value: &str) -> Result<(), ApiError> {
    if COMMIT_REF.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid {} commit", name)))
    }
}

pub async fn api_diff(
    State(state): State<AppState>,
    Query(params): Query<DiffParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_ref("from", &params.from)?;
    validate_ref("to", &params.to)?;
    let diff = state
        .service
        .diff(&CallContext::background(), &params.path, &params.from, &params.to)
        .await?;
    Ok(Json(json!({ "diff": diff })))
}

#[derive(Debug, Deserialize)]
pub struct DocumentParams {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub path: String,
    pub content: String,
}

pub async fn api_document(
    State(state): State<AppState>,
    Query(params): Query<DocumentParams>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let raw = state.service.load_raw(&params.path).await?;
    Ok(Json(DocumentResponse {
        path: params.path,
        content: String::from_utf8_lossy(&raw).into_owned(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message: String,
}

pub async fn api_save(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SaveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let remote = state.client_addr(peer, &headers);
    state
        .service
        .save_page(
            &CallContext::background(),
            &request.path,
            request.content.as_bytes(),
            &request.message,
            &remote,
        )
        .await?;
    tracing::info!(path = %request.path, remote = %remote, "page saved");
    Ok(status("saved"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
}

pub async fn api_rename(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let remote = state.client_addr(peer, &headers);
    state
        .service
        .rename_page(
            &CallContext::background(),
            &request.old_path,
            &request.new_path,
            &remote,
        )
        .await?;
    tracing::info!(from = %request.old_path, to = %request.new_path, "page renamed");
    Ok(status("renamed"))
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub html: String,
    pub headings: Vec<Heading>,
}

pub async fn api_preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let rendered = state.service.render_preview(request.content.as_bytes())?;
    Ok(Json(PreviewResponse {
        html: rendered.html,
        headings: rendered.headings,
    }))
}

pub async fn search_index(State(state): State<AppState>) -> Response {
    let payload = state.service.search_index();
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from(payload.to_string()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::serve::tests::{git_available, local_state};
    use axum::body::to_bytes;
    use gitwiki_core::PathError;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo("192.0.2.10:5000".parse().unwrap())
    }

    #[test]
    fn test_commit_ref_pattern() {
        assert!(validate_ref("from", "abcd").is_ok());
        assert!(validate_ref("from", "0123456789ABCDEF0123456789abcdef01234567").is_ok());
        assert!(validate_ref("from", "abc").is_err());
        assert!(validate_ref("from", "HEAD~1").is_err());
        assert!(validate_ref("from", "--output=x").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&SiteError::RepositoryBehind), StatusCode::CONFLICT);
        assert_eq!(status_for(&SiteError::EditingDisabled), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&SiteError::Path(PathError::InvalidPath("..".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SiteError::NotFound("x.md".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let response = ApiError::Site(SiteError::RepositoryBehind).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let value = body_json(response).await;
        assert!(value["error"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn test_save_document_and_history_round() {
        if !git_available() {
            return;
        }
        let (_dir, state) = local_state("editable: true").await;

        let saved = api_save(
            State(state.clone()),
            peer(),
            HeaderMap::new(),
            Json(SaveRequest {
                path: "notes/today".into(),
                content: "# Today\n".into(),
                message: "add today".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(saved.0["status"], "saved");

        let document = api_document(
            State(state.clone()),
            Query(DocumentParams {
                path: "notes/today".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(document.0.content, "# Today\n");

        let history = api_history(
            State(state.clone()),
            Query(HistoryParams {
                path: "notes/today".into(),
                page: 0,
                page_size: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(history.0.items.len(), 1);
        assert!(!history.0.has_more);

        let response = search_index(State(state)).await;
        let value = body_json(response).await;
        assert_eq!(value["c"], 1);
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        if !git_available() {
            return;
        }
        let (_dir, state) = local_state("editable: true").await;
        let err = api_document(
            State(state),
            Query(DocumentParams {
                path: "nowhere".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preview_and_rejected_diff() {
        if !git_available() {
            return;
        }
        let (_dir, state) = local_state("editable: false").await;

        let preview = api_preview(
            State(state.clone()),
            Json(PreviewRequest {
                content: "# One\n\n## Two\n".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(preview.0.headings.len(), 2);
        assert!(preview.0.html.contains("<h2"));

        let err = api_diff(
            State(state.clone()),
            Query(DiffParams {
                path: "Home".into(),
                from: "HEAD".into(),
                to: "abcd".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = api_save(
            State(state),
            peer(),
            HeaderMap::new(),
            Json(SaveRequest {
                path: "Home".into(),
                content: "x".into(),
                message: "edit".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }
}
