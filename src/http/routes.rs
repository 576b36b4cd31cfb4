use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::patch::cache::LookupCache;
use crate::patch::error::{LookupError, PublishError};
use crate::patch::lookup::{LookupService, resolve_version_source};
use crate::patch::publish::{PublishRequest, PublishService};

const MISSING_VERSION: &str = "Missing version parameter";

/// Shared collaborators handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<LookupService>,
    pub publish: Arc<PublishService>,
    pub cache: Arc<dyn LookupCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(lookup_handler))
        .route("/version", post(publish_handler))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct LookupParams {
    version: Option<String>,
}

/// `GET /?version=EDOPRO-LINUX-1.2.3`, falling back to the User-Agent header
async fn lookup_handler(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
    headers: HeaderMap,
) -> Response {
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let (raw, source) = match resolve_version_source(params.version.as_deref(), user_agent) {
        Ok(resolved) => resolved,
        Err(e) => return LookupError::from(e).into_response(),
    };
    debug!("Detected client version {:?} from {}", raw, source.as_str());

    let raw = raw.to_string();
    let lookup = Arc::clone(&state.lookup);
    match tokio::task::spawn_blocking(move || lookup.lookup(&raw)).await {
        Ok(Ok(patches)) => (
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            patches.into_body(),
        )
            .into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!("Lookup task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `POST /version` with `{authToken, url, os, major, minor, patch, hash}`
async fn publish_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: PublishRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return PublishError::Validation(format!("invalid JSON body: {e}")).into_response();
        }
    };

    let publish = Arc::clone(&state.publish);
    match tokio::task::spawn_blocking(move || publish.publish(&request)).await {
        Ok(Ok(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!("Publish task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Access log line per request
async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        "{} {} {} - {}ms",
        method,
        uri,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    response
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        match self {
            LookupError::Parse(e) => {
                debug!("Rejected lookup: {}", e);
                (StatusCode::BAD_REQUEST, MISSING_VERSION).into_response()
            }
            LookupError::Storage(e) => {
                error!("Lookup failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl IntoResponse for PublishError {
    fn into_response(self) -> Response {
        match self {
            PublishError::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            PublishError::Validation(e) => {
                warn!("Rejected publish: {}", e);
                StatusCode::BAD_REQUEST.into_response()
            }
            PublishError::Storage(_) => StatusCode::BAD_REQUEST.into_response(),
        }
    }
}
