//! Domain records and the request/response shapes built around them.
//!
//! Everything here is free of I/O. The `database` module loads these records,
//! calls their state-transition helpers, and writes them back.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::role::UnknownVariant;

pub mod assignment;
pub mod audience;
pub mod dashboard;
pub mod envelope;
pub mod poll;
pub mod request;
pub mod role;
pub mod user;

pub type UserId = i32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} cannot exceed {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
    },
    #[error("Deadline must be in the future")]
    DeadlineNotInFuture,
    #[error("{0}")]
    Invalid(String),
}

pub(crate) fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required(field));
    }
    Ok(())
}

pub(crate) fn max_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

pub(crate) fn in_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange { field, min, max });
    }
    Ok(())
}

/// Lifecycle shared by assignments and polls. `Active` becomes `Expired` on the
/// first save after the deadline passes; nothing moves it automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Draft,
    #[default]
    Active,
    Completed,
    Expired,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Active => "active",
            Status::Completed => "completed",
            Status::Expired => "expired",
        }
    }
}

impl FromStr for Status {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Status::Draft),
            "active" => Ok(Status::Active),
            "completed" => Ok(Status::Completed),
            "expired" => Ok(Status::Expired),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}
