//! Page routes: canonical redirects, published assets, and documents
//! rendered live or read from the snapshot.

use super::api::status_for;
use super::serve::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use gitwiki_core::{CallContext, SiteError};
use std::path::Path;
use tokio::fs;

pub async fn serve_page(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let service = &state.service;
    let path = uri.path();

    match service.canonical_redirect(path).await {
        Ok(None) => return not_found(&state, path).await,
        Ok(Some(target)) if target.redirect => {
            let location = match uri.query() {
                Some(query) => format!("{}?{}", target.target, query),
                None => target.target,
            };
            return redirect(&location);
        }
        Ok(Some(_)) => {}
        Err(err) => return error_page(&state, path, err).await,
    }

    if let Err(err) = service.ensure_request_accessible(path) {
        return error_page(&state, path, err).await;
    }

    if let Some(asset) = service.static_asset_path(path) {
        if let Ok(bytes) = fs::read(&asset).await {
            return (
                [(header::CONTENT_TYPE, content_type_for_path(&asset))],
                Body::from(bytes),
            )
                .into_response();
        }
    }

    if service.config().live {
        let document = match service.request_document(path) {
            Ok(document) => document,
            Err(err) => return error_page(&state, path, err).await,
        };
        return match service
            .render_full_page(&CallContext::background(), &document)
            .await
        {
            Ok(html) => Html(html).into_response(),
            Err(err) => error_page(&state, path, err).await,
        };
    }

    match service.static_document_path(path) {
        Ok(file) => match fs::read_to_string(&file).await {
            Ok(html) => Html(html).into_response(),
            Err(_) => not_found(&state, path).await,
        },
        Err(err) => error_page(&state, path, err).await,
    }
}

fn redirect(location: &str) -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

async fn error_page(state: &AppState, path: &str, err: SiteError) -> Response {
    match status_for(&err) {
        StatusCode::FORBIDDEN => forbidden(state, path).await,
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => not_found(state, path).await,
        _ => {
            tracing::error!(path, error = ?err, "page request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn not_found(state: &AppState, path: &str) -> Response {
    let body = if state.service.config().live {
        state.service.render_not_found(path).await.ok()
    } else {
        fs::read_to_string(state.service.not_found_document_path())
            .await
            .ok()
    };
    match body {
        Some(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

async fn forbidden(state: &AppState, path: &str) -> Response {
    let body = if state.service.config().live {
        state.service.render_forbidden(path).await.ok()
    } else {
        fs::read_to_string(state.service.forbidden_document_path())
            .await
            .ok()
    };
    match body {
        Some(html) => (StatusCode::FORBIDDEN, Html(html)).into_response(),
        None => (StatusCode::FORBIDDEN, "403 Forbidden").into_response(),
    }
}

fn content_type_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "txt" | "md" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::serve::tests::{git_available, local_state, seed_page};
    use axum::body::to_bytes;

    async fn get(state: &AppState, path: &str) -> Response {
        serve_page(State(state.clone()), Method::GET, path.parse().unwrap()).await
    }

    async fn body_text(response: Response) -> String {
        let body = to_bytes(response.into_body(), 4 * 1024 * 1024).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            content_type_for_path(Path::new("assets/site.CSS")),
            "text/css; charset=utf-8"
        );
        assert_eq!(content_type_for_path(Path::new("img/a.png")), "image/png");
        assert_eq!(
            content_type_for_path(Path::new("blob")),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_static_mode_serves_snapshot() {
        if !git_available() {
            return;
        }
        let (_dir, state) = local_state("editable: true").await;
        seed_page(&state, "guides/setup", "# Setup\n").await;

        let response = get(&state, "/guides/setup").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION].to_str().unwrap(),
            "/guides/setup/"
        );

        let response = get(&state, "/guides/setup/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<h1"));

        let response = get(&state, "/assets/site.css").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/css; charset=utf-8"
        );

        let response = get(&state, "/missing/").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("404 - Not found"));

        let response = serve_page(
            State(state.clone()),
            Method::POST,
            "/guides/setup/".parse().unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_live_mode_renders_and_guards_private_routes() {
        if !git_available() {
            return;
        }
        let (_dir, state) =
            local_state("editable: true\nlive: true\nprivate_paths: [ops]").await;
        seed_page(&state, "Home", "# Welcome\n").await;

        let response = get(&state, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Welcome"));

        let response = get(&state, "/directory").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get(&state, "/ops/keys/").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("403 - Forbidden"));

        let response = get(&state, "/nothing/here/").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
