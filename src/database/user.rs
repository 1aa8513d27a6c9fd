use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Row, postgres::PgRow};

use crate::{
    database::{DatabaseError, pool},
    model::{
        UserId,
        role::{Permission, Role},
        user::{NewUser, StudentEntry, User, UserSummary},
    },
};

const USER_COLUMNS: &str = "id, full_name, email, role, department, student_id, teacher_id, \
                            permissions, image, created_at, updated_at";

pub(crate) fn user_from_row(row: &PgRow) -> Result<User, DatabaseError> {
    let role: String = row.try_get("role")?;
    let permissions: Vec<String> = row.try_get("permissions")?;

    Ok(User {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        role: role.parse()?,
        department: row.try_get("department")?,
        student_id: row.try_get("student_id")?,
        teacher_id: row.try_get("teacher_id")?,
        permissions: permissions
            .iter()
            .map(|p| p.parse::<Permission>())
            .collect::<Result<_, _>>()?,
        image: row.try_get("image")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Creates the user with the role's default permissions.
///
/// The input should already be normalized and `password_hash` is stored as given. A taken email,
/// student id or teacher id is a [`DatabaseError::Conflict`].
pub async fn register(
    new_user: NewUser,
    password_hash: &str,
    now: DateTime<Utc>,
) -> Result<User, DatabaseError> {
    let permissions = new_user
        .role
        .default_permissions()
        .iter()
        .map(|p| p.as_str().to_owned())
        .collect::<Vec<String>>();

    let row = sqlx::query(&format!(
        "INSERT INTO users (full_name, email, password_hash, role, department, student_id, \
         teacher_id, permissions, image, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) RETURNING {USER_COLUMNS};"
    ))
    .bind(&new_user.full_name)
    .bind(&new_user.email)
    .bind(password_hash)
    .bind(new_user.role.as_str())
    .bind(&new_user.department)
    .bind(&new_user.student_id)
    .bind(&new_user.teacher_id)
    .bind(&permissions)
    .bind(&new_user.image)
    .bind(now)
    .fetch_one(pool()?)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DatabaseError::Conflict("User already exists".into())
        }
        e => e.into(),
    })?;

    let user = user_from_row(&row)?;
    tracing::info!("Registered {} {}", user.role, user.id);
    Ok(user)
}

pub async fn find_by_id(id: UserId) -> Result<Option<User>, DatabaseError> {
    sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1;"))
        .bind(id)
        .fetch_optional(pool()?)
        .await?
        .map(|row| user_from_row(&row))
        .transpose()
}

/// The user and their stored password hash, looked up by (normalized) email.
pub async fn find_credentials(email: &str) -> Result<Option<(User, String)>, DatabaseError> {
    let Some(row) = sqlx::query(&format!(
        "SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1;"
    ))
    .bind(email)
    .fetch_optional(pool()?)
    .await?
    else {
        return Ok(None);
    };

    let hash: String = row.try_get("password_hash")?;
    Ok(Some((user_from_row(&row)?, hash)))
}

pub async fn list_students() -> Result<Vec<StudentEntry>, DatabaseError> {
    let rows = sqlx::query(
        "SELECT id, full_name, email, student_id, created_at FROM users \
         WHERE role = $1 ORDER BY full_name ASC;",
    )
    .bind(Role::Student.as_str())
    .fetch_all(pool()?)
    .await?;

    rows.iter()
        .map(|row| -> Result<StudentEntry, DatabaseError> {
            Ok(StudentEntry {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                email: row.try_get("email")?,
                student_id: row.try_get("student_id")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

pub async fn count_by_role(role: Role) -> Result<i64, DatabaseError> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE role = $1;")
        .bind(role.as_str())
        .fetch_one(pool()?)
        .await?;
    Ok(row.try_get("count")?)
}

/// Name and contact details for each of `ids`, for embedding next to submissions and ballots.
pub async fn summaries(ids: &[UserId]) -> Result<BTreeMap<UserId, UserSummary>, DatabaseError> {
    if ids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let rows = sqlx::query(
        "SELECT id, full_name, email, student_id FROM users WHERE id = ANY($1);",
    )
    .bind(ids)
    .fetch_all(pool()?)
    .await?;

    rows.iter()
        .map(|row| -> Result<(UserId, UserSummary), DatabaseError> {
            let summary = UserSummary {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                email: row.try_get("email")?,
                student_id: row.try_get("student_id")?,
            };
            Ok((summary.id, summary))
        })
        .collect()
}
