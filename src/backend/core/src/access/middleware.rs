//! Axum guard that enforces an access decision per request.
//!
//! The guard reads the [`Principal`] inserted by upstream authentication and
//! evaluates the configured resource path at the depth it names. The path is
//! always given explicitly; it is never derived from the route.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, warn};

use super::decision::Decision;
use super::engine::AccessDecisionEngine;
use super::models::{Principal, ResourcePath};
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Access Context (extracted in handlers)
// ═══════════════════════════════════════════════════════════════════════════════

/// The principal and the decision that let the request through.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub principal: Principal,
    pub decision: Decision,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AccessContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessContext>()
            .cloned()
            .ok_or_else(|| {
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "MISSING_ACCESS_CONTEXT",
                    "Access context not available. Ensure the access guard is applied.",
                )
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with an access check.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/leave/:id/approve", post(approve))
///     .layer(RequireAccessLayer::new(engine.clone(), "hrm.leave.requests.approve")?);
/// ```
#[derive(Clone)]
pub struct RequireAccessLayer {
    engine: Arc<AccessDecisionEngine>,
    path: ResourcePath,
}

impl RequireAccessLayer {
    /// Guard requests with the dotted resource `path`.
    pub fn new(engine: Arc<AccessDecisionEngine>, path: &str) -> Result<Self> {
        Ok(Self::from_path(engine, path.parse()?))
    }

    pub fn from_path(engine: Arc<AccessDecisionEngine>, path: ResourcePath) -> Self {
        Self { engine, path }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }
}

impl<S> Layer<S> for RequireAccessLayer {
    type Service = RequireAccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireAccessService {
            inner,
            engine: self.engine.clone(),
            path: self.path.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RequireAccessService<S> {
    inner: S,
    engine: Arc<AccessDecisionEngine>,
    path: ResourcePath,
}

impl<S> Service<Request<Body>> for RequireAccessService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let engine = self.engine.clone();
        let path = self.path.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(principal) = request.extensions().get::<Principal>().cloned() else {
                return Ok(error_response(
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "Authentication required for this resource",
                ));
            };

            let decision = match engine.check(&principal, &path).await {
                Ok(decision) => decision,
                Err(err) => {
                    err.log();
                    error!(path = %path, user_id = principal.user_id, "Access check failed, denying");
                    return Ok(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SERVICE_UNAVAILABLE",
                        "Access could not be verified. Please retry later.",
                    ));
                }
            };

            if !decision.allowed {
                warn!(
                    user_id = principal.user_id,
                    path = %path,
                    reason = %decision.reason,
                    "Access denied"
                );
                return Ok(forbidden_response(&decision));
            }

            request
                .extensions_mut()
                .insert(AccessContext { principal, decision });

            inner.call(request).await
        })
    }
}

/// Build a 403 Forbidden JSON response carrying the deny reason.
fn forbidden_response(decision: &Decision) -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": {
            "code": "FORBIDDEN",
            "reason": decision.reason,
            "message": decision.message,
        }
    });
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": {
            "code": code,
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
