use serde::{Deserialize, Serialize};

use crate::model::user::User;

/// `?status=` on the teacher listings. Parsed by the handler so a bad value gets the JSON envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// Returned by registration and login.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub status: bool,
    pub message: String,
    pub token: String,
    pub user: User,
}
