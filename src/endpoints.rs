//! HTTP handlers, grouped by who may reach them.
//!
//! The public and all-roles endpoints live here; the `teacher` and `student` submodules hold the
//! ones behind role-specific gates. Every handler returns the `{status, message, data}` envelope.

use axum::{
    Extension, Json,
    extract::{FromRequest, FromRequestParts},
    http::StatusCode,
};
use chrono::{TimeDelta, Utc};

use crate::{
    config::{self, Config},
    database::{self, DatabaseError},
    error::{ApiError, ApiResult},
    model::{
        Status,
        envelope::Envelope,
        request::{AuthResponse, StatusQuery},
        user::{LoginRequest, NewUser, User},
    },
    security::{
        password::{hash_password, verify_password},
        token,
    },
};

pub mod student;
pub mod teacher;

/// `Json` that rejects with the error envelope instead of a plain-text body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// `Path` that rejects with the error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParams<T>(pub T);

/// `Query` that rejects with the error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

pub(crate) fn app_config() -> ApiResult<&'static Config> {
    config::get().ok_or_else(|| ApiError::Internal("Configuration not initialized".into()))
}

/// Parses a numeric path segment, answering 400 for anything else.
pub(crate) fn parse_id(raw: &str, what: &str) -> ApiResult<i32> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what} id")))
}

pub(crate) fn status_filter(query: StatusQuery) -> ApiResult<Option<Status>> {
    query
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Status>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn issue_token(user: &User) -> ApiResult<String> {
    let config = app_config()?;
    token::issue(
        user.id,
        &config.auth.jwt_secret,
        TimeDelta::hours(config.auth.token_ttl_hours),
        Utc::now(),
    )
    .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Creates an account and signs the new user in.
pub async fn register(
    JsonBody(new_user): JsonBody<NewUser>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let new_user = new_user
        .normalize()
        .map_err(|e| ApiError::operation("Registration failed", "Registration failed", e))?;
    let password_hash = hash_password(&new_user.password)
        .map_err(|e| ApiError::Internal(format!("Could not hash password: {e}")))?;

    let user = match database::user::register(new_user, &password_hash, Utc::now()).await {
        Ok(user) => user,
        Err(DatabaseError::Conflict(message)) => return Err(ApiError::BadRequest(message)),
        Err(e) => return Err(e.into()),
    };

    let token = issue_token(&user)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            status: true,
            message: "User registered successfully".into(),
            token,
            user,
        }),
    ))
}

/// Exchanges an email and password for a token.
pub async fn login(JsonBody(login): JsonBody<LoginRequest>) -> ApiResult<Json<AuthResponse>> {
    let email = login.email.trim().to_lowercase();

    let Some((user, hash)) = database::user::find_credentials(&email).await? else {
        return Err(ApiError::Unauthorized("Invalid email or password".into()));
    };
    if !verify_password(&login.password, &hash) {
        return Err(ApiError::Unauthorized("Invalid email or password".into()));
    }

    let token = issue_token(&user)?;
    tracing::info!("Logged in user {}", user.id);

    Ok(Json(AuthResponse {
        status: true,
        message: "Login successful".into(),
        token,
        user,
    }))
}

pub async fn me(Extension(user): Extension<User>) -> Json<Envelope<User>> {
    Json(Envelope::ok("User retrieved successfully", user))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, header::CONTENT_TYPE},
    };

    use super::*;
    use crate::model::poll::VoteRequest;

    fn json_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/student/polls/1/vote")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn malformed_body_answers_with_envelope() {
        for body in [r#"{"selectedOptions": ["first"]}"#, "{", r#"{"options": [0]}"#] {
            let err = JsonBody::<VoteRequest>::from_request(json_request(body), &())
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);

            let envelope = serde_json::to_value(err.envelope(false)).unwrap();
            assert_eq!(envelope["status"], false);
            assert!(!envelope["message"].as_str().unwrap().is_empty());
        }

        let JsonBody(vote) = JsonBody::<VoteRequest>::from_request(
            json_request(r#"{"selectedOptions": [1, 2]}"#),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(vote.selected_options, vec![1, 2]);
    }

    #[tokio::test]
    async fn missing_content_type_is_a_bad_request() {
        let request = Request::builder()
            .method("POST")
            .body(Body::from(r#"{"selectedOptions": [0]}"#))
            .unwrap();
        let err = JsonBody::<VoteRequest>::from_request(request, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn ids_must_be_numeric() {
        assert_eq!(parse_id("42", "poll").unwrap(), 42);
        let err = parse_id("abc", "poll").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.envelope(false).message, "Invalid poll id");
    }

    #[test]
    fn status_filter_parses_known_values() {
        let query = |s: Option<&str>| StatusQuery {
            status: s.map(str::to_owned),
        };
        assert_eq!(status_filter(query(None)).unwrap(), None);
        assert_eq!(status_filter(query(Some(""))).unwrap(), None);
        assert_eq!(
            status_filter(query(Some("expired"))).unwrap(),
            Some(Status::Expired)
        );
        assert_eq!(
            status_filter(query(Some("archived"))).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
