use std::sync::OnceLock;

use sqlx::{
    PgConnection, Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use thiserror::Error;

use crate::{config::DatabaseConfig, model::role::UnknownVariant};

pub mod assignment;
pub mod poll;
pub mod user;

static POSTGRES: OnceLock<Pool<Postgres>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database has not been initialized")]
    NotInitialized,
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Invalid data found in database: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Conflict(String),
}

impl From<UnknownVariant> for DatabaseError {
    fn from(err: UnknownVariant) -> Self {
        DatabaseError::Corrupt(err.to_string())
    }
}

/// Failure of a locked read-modify-write on one aggregate.
#[derive(Debug)]
pub enum UpdateError<E> {
    NotFound,
    /// The domain method refused the change. Nothing was written.
    Rejected(E),
    Database(DatabaseError),
}

impl<E> From<DatabaseError> for UpdateError<E> {
    fn from(err: DatabaseError) -> Self {
        UpdateError::Database(err)
    }
}

impl<E> From<sqlx::Error> for UpdateError<E> {
    fn from(err: sqlx::Error) -> Self {
        UpdateError::Database(err.into())
    }
}

pub(crate) fn pool() -> Result<&'static Pool<Postgres>, DatabaseError> {
    POSTGRES.get().ok_or(DatabaseError::NotInitialized)
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Connects, creates the schema and tables, and stores the pool globally.
pub async fn init_database(config: &DatabaseConfig) -> Result<(), DatabaseError> {
    if !valid_identifier(&config.schema) {
        return Err(DatabaseError::Corrupt(format!(
            "'{}' is not a valid schema name",
            config.schema
        )));
    }

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .username(&config.user)
        .password(&config.password)
        .options([("search_path", config.schema.as_str())]);
    if let Some(database) = &config.database {
        options = options.database(database);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    let mut transaction = pool.begin().await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", config.schema))
        .execute(&mut *transaction)
        .await?;
    create_tables(&mut transaction).await?;
    transaction.commit().await?;

    if POSTGRES.set(pool).is_err() {
        tracing::warn!("Database pool was already initialized");
    }

    Ok(())
}

async fn create_tables(conn: &mut PgConnection) -> Result<(), DatabaseError> {
    let statements = [
        r#"CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY GENERATED ALWAYS AS IDENTITY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            department TEXT,
            student_id TEXT UNIQUE,
            teacher_id TEXT UNIQUE,
            permissions TEXT[] NOT NULL,
            image TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );"#,
        r#"CREATE TABLE IF NOT EXISTS assignments(
            id INTEGER PRIMARY KEY GENERATED ALWAYS AS IDENTITY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            subject TEXT NOT NULL,
            deadline TIMESTAMPTZ NOT NULL,
            total_marks INTEGER NOT NULL,
            status TEXT NOT NULL,
            audience TEXT NOT NULL,
            created_by INTEGER NOT NULL REFERENCES users (id),
            instructions TEXT,
            allow_late_submission BOOLEAN NOT NULL,
            max_submissions INTEGER NOT NULL,
            auto_grade BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );"#,
        r#"CREATE TABLE IF NOT EXISTS assignment_targets(
            assignment_id INTEGER REFERENCES assignments (id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users (id) ON DELETE CASCADE,
            PRIMARY KEY (assignment_id, user_id)
        );"#,
        r#"CREATE TABLE IF NOT EXISTS assignment_resources(
            assignment_id INTEGER REFERENCES assignments (id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY (assignment_id, position)
        );"#,
        r#"CREATE TABLE IF NOT EXISTS submissions(
            assignment_id INTEGER REFERENCES assignments (id) ON DELETE CASCADE,
            student_id INTEGER REFERENCES users (id) ON DELETE CASCADE,
            attempt INTEGER NOT NULL,
            submitted_at TIMESTAMPTZ NOT NULL,
            content TEXT NOT NULL,
            attachments JSONB NOT NULL,
            marks REAL,
            feedback TEXT,
            graded_at TIMESTAMPTZ,
            graded_by INTEGER REFERENCES users (id),
            is_late BOOLEAN NOT NULL,
            PRIMARY KEY (assignment_id, student_id, attempt)
        );"#,
        r#"CREATE TABLE IF NOT EXISTS polls(
            id INTEGER PRIMARY KEY GENERATED ALWAYS AS IDENTITY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            kind TEXT NOT NULL,
            deadline TIMESTAMPTZ NOT NULL,
            is_anonymous BOOLEAN NOT NULL,
            audience TEXT NOT NULL,
            created_by INTEGER NOT NULL REFERENCES users (id),
            status TEXT NOT NULL,
            allow_multiple_votes BOOLEAN NOT NULL,
            show_results TEXT NOT NULL,
            max_votes_per_user INTEGER NOT NULL,
            category TEXT,
            tags TEXT[] NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );"#,
        r#"CREATE TABLE IF NOT EXISTS poll_targets(
            poll_id INTEGER REFERENCES polls (id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users (id) ON DELETE CASCADE,
            PRIMARY KEY (poll_id, user_id)
        );"#,
        r#"CREATE TABLE IF NOT EXISTS poll_options(
            poll_id INTEGER REFERENCES polls (id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            votes INTEGER NOT NULL CHECK (votes >= 0),
            PRIMARY KEY (poll_id, position)
        );"#,
        r#"CREATE TABLE IF NOT EXISTS poll_ballots(
            id INTEGER PRIMARY KEY GENERATED ALWAYS AS IDENTITY,
            poll_id INTEGER NOT NULL REFERENCES polls (id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            voted_at TIMESTAMPTZ NOT NULL,
            selected_options INTEGER[] NOT NULL
        );"#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_are_plain_identifiers() {
        assert!(valid_identifier("classroom"));
        assert!(valid_identifier("school_2"));
        assert!(!valid_identifier("class; DROP TABLE users"));
        assert!(!valid_identifier(""));
    }
}
