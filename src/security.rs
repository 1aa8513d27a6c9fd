//! Role and permission gates for the HTTP layer.
//!
//! Every protected group of routes is wrapped in [`authorize`] with an [`AccessPolicy`] as its state.
//! A request that passes carries the resolved [`User`] in its extensions for the handlers.

use std::future::Future;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use serde_json::json;

use crate::{
    config,
    database::{self, DatabaseError},
    error::ApiError,
    model::{
        UserId,
        role::{Permission, Role, join_names},
        user::User,
    },
};

pub mod password;
pub mod token;

/// Which users may pass. An empty `roles` admits every role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl AccessPolicy {
    pub fn new(roles: &[Role], permissions: &[Permission]) -> Self {
        Self {
            roles: roles.to_vec(),
            permissions: permissions.to_vec(),
        }
    }

    pub fn student_only() -> Self {
        Self::new(&[Role::Student], &[])
    }

    pub fn teacher_only() -> Self {
        Self::new(&[Role::Teacher], &[])
    }

    pub fn admin_only() -> Self {
        Self::new(&[Role::Admin], &[])
    }

    pub fn teacher_or_admin() -> Self {
        Self::new(&[Role::Teacher, Role::Admin], &[])
    }

    pub fn student_or_teacher() -> Self {
        Self::new(&[Role::Student, Role::Teacher], &[])
    }

    pub fn all_roles() -> Self {
        Self::new(&Role::ALL, &[])
    }

    /// Any role, as long as it holds every one of `permissions`.
    pub fn require_permissions(permissions: &[Permission]) -> Self {
        Self::new(&[], permissions)
    }

    pub fn with_permissions(mut self, permissions: &[Permission]) -> Self {
        self.permissions.extend_from_slice(permissions);
        self
    }

    /// Role allow-list first, then permissions. Admins skip the permission check.
    pub fn check(&self, user: &User) -> Result<(), ApiError> {
        if !self.roles.is_empty() && !self.roles.contains(&user.role) {
            return Err(ApiError::Forbidden {
                message: format!("Access denied. Required roles: {}", join_names(&self.roles)),
                detail: Some(json!({
                    "userRole": user.role,
                    "allowedRoles": self.roles,
                })),
            });
        }

        if !self.permissions.is_empty()
            && user.role != Role::Admin
            && !user.has_permissions(&self.permissions)
        {
            return Err(ApiError::Forbidden {
                message: format!(
                    "Insufficient permissions. Required: {}",
                    join_names(&self.permissions)
                ),
                detail: Some(json!({
                    "userPermissions": user.permissions,
                    "requiredPermissions": self.permissions,
                })),
            });
        }

        Ok(())
    }
}

/// Pulls the bearer token out of the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let Some(value) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return Err(ApiError::Unauthorized("Authorization token required".into()));
    };

    let token = value.trim();
    if token.is_empty() || token == "null" || token == "undefined" {
        return Err(ApiError::Unauthorized("Invalid authorization token".into()));
    }

    Ok(token)
}

/// Authenticates the request and applies `policy`.
///
/// `lookup` loads a user by id; it is the only I/O this performs.
pub async fn resolve_user<F, Fut>(
    headers: &HeaderMap,
    secret: &str,
    policy: &AccessPolicy,
    lookup: F,
) -> Result<User, ApiError>
where
    F: FnOnce(UserId) -> Fut,
    Fut: Future<Output = Result<Option<User>, DatabaseError>>,
{
    let token = bearer_token(headers)?;
    let claims =
        token::verify(token, secret).map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let Some(user) = lookup(claims.user_id).await? else {
        return Err(ApiError::forbidden("User not found"));
    };

    policy.check(&user)?;
    Ok(user)
}

/// Middleware used through `from_fn_with_state(policy, authorize)`.
pub async fn authorize(
    State(policy): State<AccessPolicy>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(config) = config::get() else {
        return Err(ApiError::Internal("Configuration not initialized".into()));
    };

    let user = resolve_user(
        request.headers(),
        &config.auth.jwt_secret,
        &policy,
        database::user::find_by_id,
    )
    .await?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
