use std::collections::BTreeMap;

use axum::{Extension, Json, http::StatusCode};
use chrono::Utc;
use serde::Serialize;

use crate::{
    database::{self, UpdateError},
    endpoints::{JsonBody, PathParams, QueryParams, parse_id, status_filter},
    error::{ApiError, ApiResult},
    model::{
        Status, UserId,
        assignment::{Assignment, AssignmentError, GradeRequest, NewAssignment, Submission},
        dashboard::{AssignmentSummary, Dashboard, DashboardStats, PollSummary, TeacherInfo},
        envelope::Envelope,
        poll::{NewPoll, Poll, PollResults},
        request::StatusQuery,
        role::Role,
        user::{StudentEntry, User, UserSummary},
    },
};

const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Serialize)]
pub struct AssignmentDetail {
    pub assignment: Assignment,
    /// The submitting students, keyed by id.
    pub students: BTreeMap<UserId, UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct PollDetail {
    pub poll: Poll,
    pub results: PollResults,
}

pub async fn dashboard(Extension(teacher): Extension<User>) -> ApiResult<Json<Envelope<Dashboard>>> {
    let id = teacher.id;

    let stats = DashboardStats {
        total_assignments: database::assignment::count_for_teacher(id, None).await?,
        active_assignments: database::assignment::count_for_teacher(id, Some(Status::Active))
            .await?,
        total_polls: database::poll::count_for_teacher(id, None).await?,
        active_polls: database::poll::count_for_teacher(id, Some(Status::Active)).await?,
        total_students: database::user::count_by_role(Role::Student).await?,
    };

    let recent_assignments =
        database::assignment::list_for_teacher(id, None, Some(RECENT_LIMIT)).await?;
    let recent_polls = database::poll::list_for_teacher(id, None, Some(RECENT_LIMIT)).await?;

    Ok(Json(Envelope::ok(
        "Teacher dashboard data retrieved successfully",
        Dashboard {
            teacher: TeacherInfo::from(&teacher),
            stats,
            recent_assignments: recent_assignments.iter().map(AssignmentSummary::from).collect(),
            recent_polls: recent_polls.iter().map(PollSummary::from).collect(),
        },
    )))
}

pub async fn create_assignment(
    Extension(teacher): Extension<User>,
    JsonBody(request): JsonBody<NewAssignment>,
) -> ApiResult<(StatusCode, Json<Envelope<Assignment>>)> {
    let assignment = request.into_assignment(teacher.id, Utc::now()).map_err(|e| {
        ApiError::operation("Failed to create assignment", "Assignment creation failed", e)
    })?;

    let assignment = database::assignment::create(assignment).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("Assignment created successfully", assignment)),
    ))
}

pub async fn list_assignments(
    Extension(teacher): Extension<User>,
    QueryParams(query): QueryParams<StatusQuery>,
) -> ApiResult<Json<Envelope<Vec<Assignment>>>> {
    let status = status_filter(query)?;
    let assignments = database::assignment::list_for_teacher(teacher.id, status, None).await?;
    Ok(Json(Envelope::ok(
        "Assignments retrieved successfully",
        assignments,
    )))
}

pub async fn get_assignment(
    Extension(teacher): Extension<User>,
    PathParams(assignment_id): PathParams<String>,
) -> ApiResult<Json<Envelope<AssignmentDetail>>> {
    let id = parse_id(&assignment_id, "assignment")?;

    let Some(assignment) = database::assignment::find_for_teacher(id, teacher.id).await? else {
        return Err(ApiError::NotFound("Assignment not found".into()));
    };

    let submitters = assignment.submissions.keys().copied().collect::<Vec<UserId>>();
    let students = database::user::summaries(&submitters).await?;

    Ok(Json(Envelope::ok(
        "Assignment retrieved successfully",
        AssignmentDetail {
            assignment,
            students,
        },
    )))
}

pub async fn grade_assignment(
    Extension(teacher): Extension<User>,
    PathParams((assignment_id, student_id)): PathParams<(String, String)>,
    JsonBody(grade): JsonBody<GradeRequest>,
) -> ApiResult<Json<Envelope<Submission>>> {
    let id = parse_id(&assignment_id, "assignment")?;
    let student = parse_id(&student_id, "student")?;

    match database::assignment::grade(id, teacher.id, student, grade, Utc::now()).await {
        Ok(submission) => Ok(Json(Envelope::ok(
            "Assignment graded successfully",
            submission,
        ))),
        Err(UpdateError::NotFound) => Err(ApiError::NotFound("Assignment not found".into())),
        Err(UpdateError::Rejected(AssignmentError::SubmissionNotFound)) => {
            Err(ApiError::NotFound("Submission not found".into()))
        }
        Err(UpdateError::Rejected(e)) => Err(ApiError::operation(
            "Failed to grade assignment",
            "Grading failed",
            e,
        )),
        Err(UpdateError::Database(e)) => Err(e.into()),
    }
}

pub async fn create_poll(
    Extension(teacher): Extension<User>,
    JsonBody(request): JsonBody<NewPoll>,
) -> ApiResult<(StatusCode, Json<Envelope<Poll>>)> {
    let poll = request
        .into_poll(teacher.id, Utc::now())
        .map_err(|e| ApiError::operation("Failed to create poll", "Poll creation failed", e))?;

    let poll = database::poll::create(poll).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("Poll created successfully", poll)),
    ))
}

pub async fn list_polls(
    Extension(teacher): Extension<User>,
    QueryParams(query): QueryParams<StatusQuery>,
) -> ApiResult<Json<Envelope<Vec<Poll>>>> {
    let status = status_filter(query)?;
    let polls = database::poll::list_for_teacher(teacher.id, status, None).await?;
    Ok(Json(Envelope::ok("Polls retrieved successfully", polls)))
}

/// The poll and its results. Read without a viewer, so only `after_deadline` can hide them.
pub async fn get_poll(
    Extension(teacher): Extension<User>,
    PathParams(poll_id): PathParams<String>,
) -> ApiResult<Json<Envelope<PollDetail>>> {
    let id = parse_id(&poll_id, "poll")?;

    let Some(poll) = database::poll::find_for_teacher(id, teacher.id).await? else {
        return Err(ApiError::NotFound("Poll not found".into()));
    };

    let results = poll.results(None, Utc::now());
    Ok(Json(Envelope::ok(
        "Poll retrieved successfully",
        PollDetail { poll, results },
    )))
}

pub async fn students() -> ApiResult<Json<Envelope<Vec<StudentEntry>>>> {
    let students = database::user::list_students().await?;
    Ok(Json(Envelope::ok("Students retrieved successfully", students)))
}
