//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use quick_xml::escape::escape;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, error, warn};

use super::proxy::{OaiProxy, ProxyRequest};
use crate::Error;

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Shared application state
pub struct AppState {
    /// Proxy core
    pub proxy: Arc<OaiProxy>,
    /// Deadline for one request, backend and transforms included
    pub request_timeout: Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/oai", get(oai_handler).post(oai_handler))
        .route("/record/{format}/{*identifier}", get(record_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// OAI-PMH endpoint
async fn oai_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let mut params: Vec<(String, String)> = query
        .as_deref()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if method == Method::POST && is_form {
        params.extend(url::form_urlencoded::parse(&body).into_owned());
    }

    let request = ProxyRequest {
        method,
        headers,
        params,
    };

    let result = tokio::time::timeout(state.request_timeout, state.proxy.handle(request))
        .await
        .unwrap_or_else(|_| {
            Err(Error::BackendTimeout(format!(
                "Request exceeded {:?}",
                state.request_timeout
            )))
        });

    match result {
        Ok(response) => {
            debug!(status = %response.status, verb = ?response.query.get("verb"), "Proxied request");
            match response.body() {
                Ok(body) => xml_response(response.status, body),
                Err(e) => e.into_response(),
            }
        }
        Err(e) => e.into_response(),
    }
}

/// Single record in a given format
async fn record_handler(
    State(state): State<Arc<AppState>>,
    Path((format, identifier)): Path<(String, String)>,
) -> Response {
    let lookup = tokio::time::timeout(
        state.request_timeout,
        state.proxy.get_record(&format, &identifier),
    )
    .await
    .unwrap_or_else(|_| {
        Err(Error::BackendTimeout(format!(
            "Request exceeded {:?}",
            state.request_timeout
        )))
    });

    match lookup {
        Ok(Some(fragment)) => xml_response(StatusCode::OK, fragment),
        Ok(None) => {
            debug!(format = %format, identifier = %identifier, "Record not found");
            error_response(
                StatusCode::NOT_FOUND,
                "idDoesNotExist",
                &format!("No record {identifier} in format {format}"),
            )
        }
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "Request failed");
        } else {
            warn!(code = self.code(), error = %self, "Request rejected");
        }
        error_response(status, self.code(), &self.to_string())
    }
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, XML_CONTENT_TYPE)], body).into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<error code=\"{code}\">{}</error>\n",
        escape(message)
    );
    xml_response(status, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response_is_xml() {
        let response = Error::BackendProtocol("bad <xml>".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CONTENT_TYPE], XML_CONTENT_TYPE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<error code=\"backendProtocol\">"));
        assert!(body.contains("bad &lt;xml&gt;"));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let response = Error::BackendTimeout("slow".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
