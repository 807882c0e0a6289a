// src/proxy/handlers.rs
//! Distribution listing and file endpoints

use super::ProxyState;
use crate::error::Error;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Listings may change upstream
const LISTING_CACHE_CONTROL: &str = "max-age=600, public";

/// A file for an exact version never changes
const FILE_CACHE_CONTROL: &str = "max-age=365000000, immutable, public";

/// GET /:dist/
pub async fn distribution_page(
    State(state): State<Arc<ProxyState>>,
    Path(dist_name): Path<String>,
) -> Response {
    debug!("Serving index page for {}", dist_name);

    match state.file_urls(&dist_name).await {
        Ok(Some(urls)) => {
            let body = render_listing(&dist_name, urls.keys().map(String::as_str));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .header(header::CACHE_CONTROL, LISTING_CACHE_CONTROL)
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Ok(None) => (StatusCode::NOT_FOUND, "Distribution not found").into_response(),
        Err(e) => upstream_failure(&dist_name, e),
    }
}

/// Anchor list pip parses for one distribution
fn render_listing<'a>(dist_name: &str, file_names: impl Iterator<Item = &'a str>) -> String {
    let dist_name = escape_html(dist_name);
    let mut body = String::from("<!DOCTYPE html><html><body>\n");
    for file_name in file_names.map(escape_html) {
        body.push_str(&format!(
            "<a href='/{dist_name}/{file_name}/'>{file_name}</a>\n"
        ));
    }
    body.push_str("</body></html>");
    body
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// GET /:dist/:file/
pub async fn distribution_file(
    State(state): State<Arc<ProxyState>>,
    Path((dist_name, file_name)): Path<(String, String)>,
) -> Response {
    debug!("Serving {} for {}", file_name, dist_name);

    match state.file_content(&dist_name, &file_name).await {
        Ok(Some(content)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CACHE_CONTROL, FILE_CACHE_CONTROL)
            .body(Body::from(content))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Ok(None) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(Error::Parse(msg)) => (StatusCode::NOT_FOUND, msg).into_response(),
        Err(e) => upstream_failure(&file_name, e),
    }
}

fn upstream_failure(what: &str, e: Error) -> Response {
    error!("Failed to serve {}: {}", what, e);
    (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
}
