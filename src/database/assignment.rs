use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row, postgres::PgRow, types::Json};

use crate::{
    database::{DatabaseError, UpdateError, pool},
    model::{
        Status, UserId,
        assignment::{
            Assignment, AssignmentError, AssignmentId, Attachment, GradeRequest, NewSubmission,
            Resource, Submission,
        },
        audience::{Audience, AudienceKind},
        user::User,
    },
};

const ASSIGNMENT_COLUMNS: &str = "id, title, description, subject, deadline, total_marks, status, \
                                  audience, created_by, instructions, allow_late_submission, \
                                  max_submissions, auto_grade, created_at, updated_at";

/// Builds the full aggregate for one `assignments` row.
async fn hydrate(conn: &mut PgConnection, row: &PgRow) -> Result<Assignment, DatabaseError> {
    let id: AssignmentId = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let audience: String = row.try_get("audience")?;
    let audience = audience.parse::<AudienceKind>()?;

    let targets = if audience == AudienceKind::Specific {
        sqlx::query("SELECT user_id FROM assignment_targets WHERE assignment_id = $1;")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|r| r.try_get("user_id"))
            .collect::<Result<Vec<UserId>, _>>()?
    } else {
        vec![]
    };

    let resources = sqlx::query(
        "SELECT title, url, kind FROM assignment_resources \
         WHERE assignment_id = $1 ORDER BY position;",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| -> Result<Resource, DatabaseError> {
        let kind: String = r.try_get("kind")?;
        Ok(Resource {
            title: r.try_get("title")?,
            url: r.try_get("url")?,
            kind: kind.parse()?,
        })
    })
    .collect::<Result<Vec<Resource>, _>>()?;

    let mut submissions: BTreeMap<UserId, Vec<Submission>> = BTreeMap::new();
    let rows = sqlx::query(
        "SELECT student_id, attempt, submitted_at, content, attachments, marks, feedback, \
         graded_at, graded_by, is_late FROM submissions \
         WHERE assignment_id = $1 ORDER BY student_id, attempt;",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    for r in rows {
        let Json(attachments): Json<Vec<Attachment>> = r.try_get("attachments")?;
        let submission = Submission {
            student: r.try_get("student_id")?,
            attempt: r.try_get("attempt")?,
            submitted_at: r.try_get("submitted_at")?,
            content: r.try_get("content")?,
            attachments,
            marks: r.try_get("marks")?,
            feedback: r.try_get("feedback")?,
            graded_at: r.try_get("graded_at")?,
            graded_by: r.try_get("graded_by")?,
            is_late: r.try_get("is_late")?,
        };
        submissions
            .entry(submission.student)
            .or_default()
            .push(submission);
    }

    Ok(Assignment {
        id,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        subject: row.try_get("subject")?,
        deadline: row.try_get("deadline")?,
        total_marks: row.try_get("total_marks")?,
        status: status.parse()?,
        audience: Audience::new(audience, targets)
            .map_err(|e| DatabaseError::Corrupt(e.to_string()))?,
        created_by: row.try_get("created_by")?,
        submissions,
        instructions: row.try_get("instructions")?,
        resources,
        allow_late_submission: row.try_get("allow_late_submission")?,
        max_submissions: row.try_get("max_submissions")?,
        auto_grade: row.try_get("auto_grade")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn hydrate_all(rows: Vec<PgRow>) -> Result<Vec<Assignment>, DatabaseError> {
    let mut conn = pool()?.acquire().await?;
    let mut assignments = Vec::with_capacity(rows.len());
    for row in &rows {
        assignments.push(hydrate(&mut conn, row).await?);
    }
    Ok(assignments)
}

async fn insert_submission(
    conn: &mut PgConnection,
    id: AssignmentId,
    submission: &Submission,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT INTO submissions (assignment_id, student_id, attempt, submitted_at, content, \
         attachments, marks, feedback, graded_at, graded_by, is_late) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11);",
    )
    .bind(id)
    .bind(submission.student)
    .bind(submission.attempt)
    .bind(submission.submitted_at)
    .bind(&submission.content)
    .bind(Json(&submission.attachments))
    .bind(submission.marks)
    .bind(&submission.feedback)
    .bind(submission.graded_at)
    .bind(submission.graded_by)
    .bind(submission.is_late)
    .execute(conn)
    .await?;
    Ok(())
}

async fn save_status(conn: &mut PgConnection, assignment: &Assignment) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE assignments SET status = $2, updated_at = $3 WHERE id = $1;")
        .bind(assignment.id)
        .bind(assignment.status.as_str())
        .bind(assignment.updated_at)
        .execute(conn)
        .await?;
    Ok(())
}

/// Stores a new assignment with its targets and resources. Returns it with its id.
pub async fn create(mut assignment: Assignment) -> Result<Assignment, DatabaseError> {
    let mut transaction = pool()?.begin().await?;

    let row = sqlx::query(
        "INSERT INTO assignments (title, description, subject, deadline, total_marks, status, \
         audience, created_by, instructions, allow_late_submission, max_submissions, auto_grade, \
         created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) RETURNING id;",
    )
    .bind(&assignment.title)
    .bind(&assignment.description)
    .bind(&assignment.subject)
    .bind(assignment.deadline)
    .bind(assignment.total_marks)
    .bind(assignment.status.as_str())
    .bind(assignment.audience.kind().as_str())
    .bind(assignment.created_by)
    .bind(&assignment.instructions)
    .bind(assignment.allow_late_submission)
    .bind(assignment.max_submissions)
    .bind(assignment.auto_grade)
    .bind(assignment.created_at)
    .bind(assignment.updated_at)
    .fetch_one(&mut *transaction)
    .await?;
    assignment.id = row.try_get("id")?;

    for target in assignment.audience.targets() {
        sqlx::query("INSERT INTO assignment_targets (assignment_id, user_id) VALUES ($1, $2);")
            .bind(assignment.id)
            .bind(target)
            .execute(&mut *transaction)
            .await?;
    }

    for (position, resource) in assignment.resources.iter().enumerate() {
        sqlx::query(
            "INSERT INTO assignment_resources (assignment_id, position, title, url, kind) \
             VALUES ($1, $2, $3, $4, $5);",
        )
        .bind(assignment.id)
        .bind(position as i32)
        .bind(&resource.title)
        .bind(&resource.url)
        .bind(resource.kind.as_str())
        .execute(&mut *transaction)
        .await?;
    }

    transaction.commit().await?;
    tracing::info!(
        "Assignment {} created by {}",
        assignment.id,
        assignment.created_by
    );
    Ok(assignment)
}

/// One of `teacher`'s assignments.
pub async fn find_for_teacher(
    id: AssignmentId,
    teacher: UserId,
) -> Result<Option<Assignment>, DatabaseError> {
    let mut conn = pool()?.acquire().await?;
    let row = sqlx::query(&format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1 AND created_by = $2;"
    ))
    .bind(id)
    .bind(teacher)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate(&mut conn, &row).await?)),
        None => Ok(None),
    }
}

/// Newest first, optionally filtered by status and capped at `limit`.
pub async fn list_for_teacher(
    teacher: UserId,
    status: Option<Status>,
    limit: Option<i64>,
) -> Result<Vec<Assignment>, DatabaseError> {
    let rows = sqlx::query(&format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
         WHERE created_by = $1 AND ($2::TEXT IS NULL OR status = $2) \
         ORDER BY created_at DESC LIMIT $3;"
    ))
    .bind(teacher)
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool()?)
    .await?;

    hydrate_all(rows).await
}

pub async fn count_for_teacher(
    teacher: UserId,
    status: Option<Status>,
) -> Result<i64, DatabaseError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count FROM assignments \
         WHERE created_by = $1 AND ($2::TEXT IS NULL OR status = $2);",
    )
    .bind(teacher)
    .bind(status.map(|s| s.as_str()))
    .fetch_one(pool()?)
    .await?;
    Ok(row.try_get("count")?)
}

/// Open or expired assignments addressed to everyone or to `student` specifically, earliest
/// deadline first.
pub async fn list_for_student(student: &User) -> Result<Vec<Assignment>, DatabaseError> {
    let rows = sqlx::query(&format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments a \
         WHERE status IN ('active', 'expired') AND (audience = 'all' OR (audience = 'specific' \
         AND EXISTS (SELECT 1 FROM assignment_targets t \
         WHERE t.assignment_id = a.id AND t.user_id = $1))) \
         ORDER BY deadline ASC;"
    ))
    .bind(student.id)
    .fetch_all(pool()?)
    .await?;

    let assignments = hydrate_all(rows).await?;
    Ok(assignments
        .into_iter()
        .filter(|a| a.visible_to(student))
        .collect())
}

async fn lock(
    conn: &mut PgConnection,
    id: AssignmentId,
    owner: Option<UserId>,
) -> Result<Option<Assignment>, DatabaseError> {
    let row = sqlx::query(&format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
         WHERE id = $1 AND ($2::INTEGER IS NULL OR created_by = $2) FOR UPDATE;"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate(conn, &row).await?)),
        None => Ok(None),
    }
}

/// Records a new attempt while holding the assignment's row lock.
pub async fn submit(
    id: AssignmentId,
    student: &User,
    submission: NewSubmission,
    now: DateTime<Utc>,
) -> Result<Submission, UpdateError<AssignmentError>> {
    let mut transaction = pool()?.begin().await?;
    let Some(mut assignment) = lock(&mut transaction, id, None).await? else {
        return Err(UpdateError::NotFound);
    };

    assignment.refresh_status(now);
    let saved = assignment
        .submit(student, submission, now)
        .map_err(UpdateError::Rejected)?
        .clone();

    insert_submission(&mut transaction, id, &saved).await?;
    save_status(&mut transaction, &assignment).await?;
    transaction.commit().await?;

    tracing::info!(
        "Student {} submitted attempt {} for assignment {}",
        student.id,
        saved.attempt,
        id
    );
    Ok(saved)
}

/// Grades `student`'s latest attempt on one of `teacher`'s assignments.
pub async fn grade(
    id: AssignmentId,
    teacher: UserId,
    student: UserId,
    grade: GradeRequest,
    now: DateTime<Utc>,
) -> Result<Submission, UpdateError<AssignmentError>> {
    let mut transaction = pool()?.begin().await?;
    let Some(mut assignment) = lock(&mut transaction, id, Some(teacher)).await? else {
        return Err(UpdateError::NotFound);
    };

    let graded = assignment
        .grade(student, grade, teacher, now)
        .map_err(UpdateError::Rejected)?
        .clone();
    assignment.refresh_status(now);

    sqlx::query(
        "UPDATE submissions SET marks = $4, feedback = $5, graded_at = $6, graded_by = $7 \
         WHERE assignment_id = $1 AND student_id = $2 AND attempt = $3;",
    )
    .bind(id)
    .bind(student)
    .bind(graded.attempt)
    .bind(graded.marks)
    .bind(&graded.feedback)
    .bind(graded.graded_at)
    .bind(graded.graded_by)
    .execute(&mut *transaction)
    .await?;
    save_status(&mut transaction, &assignment).await?;
    transaction.commit().await?;

    tracing::info!("Assignment {} graded for student {}", id, student);
    Ok(graded)
}
