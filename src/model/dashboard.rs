use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    Status,
    assignment::{Assignment, AssignmentId},
    poll::{Poll, PollId},
    user::User,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub teacher: TeacherInfo,
    pub stats: DashboardStats,
    pub recent_assignments: Vec<AssignmentSummary>,
    pub recent_polls: Vec<PollSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInfo {
    pub name: String,
    pub email: String,
    pub department: Option<String>,
    pub teacher_id: Option<String>,
}

impl From<&User> for TeacherInfo {
    fn from(user: &User) -> Self {
        Self {
            name: user.full_name.clone(),
            email: user.email.clone(),
            department: user.department.clone(),
            teacher_id: user.teacher_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_assignments: i64,
    pub active_assignments: i64,
    pub total_polls: i64,
    pub active_polls: i64,
    pub total_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    pub id: AssignmentId,
    pub title: String,
    pub subject: String,
    pub deadline: DateTime<Utc>,
    pub status: Status,
    pub submission_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Assignment> for AssignmentSummary {
    fn from(a: &Assignment) -> Self {
        Self {
            id: a.id,
            title: a.title.clone(),
            subject: a.subject.clone(),
            deadline: a.deadline,
            status: a.status,
            submission_count: a.submission_count(),
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub id: PollId,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub status: Status,
    pub total_votes: i64,
    pub unique_voters: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Poll> for PollSummary {
    fn from(p: &Poll) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            deadline: p.deadline,
            status: p.status,
            total_votes: p.total_votes(),
            unique_voters: p.unique_voter_count(),
            created_at: p.created_at,
        }
    }
}
