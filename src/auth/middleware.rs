use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::{JwtManager, Role};
use crate::error::AppError;

/// State for the role-enforcing middleware layer. One guard per router.
#[derive(Clone)]
pub struct RoleGuard {
    pub manager: Arc<JwtManager>,
    pub role: Role,
}

impl RoleGuard {
    pub fn new(manager: Arc<JwtManager>, role: Role) -> Self {
        Self { manager, role }
    }
}

/// Validates the bearer token, enforces the role, and stores [`Claims`] in
/// request extensions for the handlers.
pub async fn require_role(
    State(guard): State<RoleGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("authorization header missing".to_string()))?;

    let claims = guard.manager.verify_bearer(header, guard.role)?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
