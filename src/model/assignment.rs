use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Status, UserId, ValidationError,
    audience::{Audience, AudienceKind},
    in_range, max_len, require,
    role::UnknownVariant,
    user::User,
};

pub type AssignmentId = i32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: AssignmentId,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub deadline: DateTime<Utc>,
    pub total_marks: i32,
    pub status: Status,
    pub audience: Audience,
    pub created_by: UserId,
    /// Every attempt, grouped by the submitting student, oldest first.
    pub submissions: BTreeMap<UserId, Vec<Submission>>,
    pub instructions: Option<String>,
    pub resources: Vec<Resource>,
    pub allow_late_submission: bool,
    pub max_submissions: i32,
    pub auto_grade: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub student: UserId,
    /// 1-based, per student
    pub attempt: i32,
    pub submitted_at: DateTime<Utc>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub marks: Option<f32>,
    pub feedback: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<UserId>,
    pub is_late: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
    pub size: i64,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Link,
    File,
    Video,
    Document,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Link => "link",
            ResourceKind::File => "file",
            ResourceKind::Video => "video",
            ResourceKind::Document => "document",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(ResourceKind::Link),
            "file" => Ok(ResourceKind::File),
            "video" => Ok(ResourceKind::Video),
            "document" => Ok(ResourceKind::Document),
            other => Err(UnknownVariant::new("resource type", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssignmentError {
    #[error("Student is not part of this assignment's audience")]
    NotInAudience,
    #[error("Submission limit reached or assignment is closed")]
    CannotSubmit,
    #[error("Submission not found")]
    SubmissionNotFound,
    #[error("Marks cannot exceed total marks")]
    MarksExceedTotal,
    #[error("Marks must be a non-negative number")]
    InvalidMarks,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Body of a create-assignment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub title: String,
    pub description: String,
    pub subject: String,
    pub deadline: DateTime<Utc>,
    pub total_marks: i32,
    #[serde(default)]
    pub audience: Option<AudienceKind>,
    #[serde(default)]
    pub target_students: Vec<UserId>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub allow_late_submission: Option<bool>,
    #[serde(default)]
    pub max_submissions: Option<i32>,
    #[serde(default)]
    pub auto_grade: Option<bool>,
}

impl NewAssignment {
    /// Builds an unsaved assignment (`id` 0). The deadline has to be ahead of `now`.
    pub fn into_assignment(
        self,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<Assignment, AssignmentError> {
        if self.deadline <= now {
            return Err(ValidationError::DeadlineNotInFuture.into());
        }

        let audience = Audience::new(self.audience.unwrap_or_default(), self.target_students)?;

        let assignment = Assignment {
            id: 0,
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            subject: self.subject.trim().to_owned(),
            deadline: self.deadline,
            total_marks: self.total_marks,
            status: Status::Active,
            audience,
            created_by,
            submissions: BTreeMap::new(),
            instructions: self.instructions,
            resources: self.resources,
            allow_late_submission: self.allow_late_submission.unwrap_or(true),
            max_submissions: self.max_submissions.unwrap_or(1),
            auto_grade: self.auto_grade.unwrap_or(false),
            created_at: now,
            updated_at: now,
        };

        assignment.validate()?;
        Ok(assignment)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRequest {
    pub marks: f32,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Assignment {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.values().map(Vec::len).sum()
    }

    /// Runs before every save.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        if self.deadline < now && self.status == Status::Active {
            self.status = Status::Expired;
        }
        self.updated_at = now;
    }

    pub fn attempts_by(&self, student: UserId) -> usize {
        self.submissions.get(&student).map_or(0, Vec::len)
    }

    pub fn can_student_submit(&self, student: UserId) -> bool {
        let open = self.status == Status::Active
            || (self.allow_late_submission && self.status == Status::Expired);

        (self.attempts_by(student) as i64) < self.max_submissions as i64 && open
    }

    /// The student's most recent attempt.
    pub fn student_submission(&self, student: UserId) -> Option<&Submission> {
        self.submissions.get(&student).and_then(|s| s.last())
    }

    /// Listed to the student when targeted and not draft/completed.
    pub fn visible_to(&self, user: &User) -> bool {
        matches!(self.audience, Audience::All | Audience::Specific(_))
            && self.audience.admits(user)
            && matches!(self.status, Status::Active | Status::Expired)
    }

    pub fn submit(
        &mut self,
        student: &User,
        submission: NewSubmission,
        now: DateTime<Utc>,
    ) -> Result<&Submission, AssignmentError> {
        if !self.audience.admits(student) {
            return Err(AssignmentError::NotInAudience);
        }
        if !self.can_student_submit(student.id) {
            return Err(AssignmentError::CannotSubmit);
        }

        let content = submission.content.trim().to_owned();
        require("content", &content)?;
        max_len("content", &content, 5000)?;

        let attempt = self.attempts_by(student.id) as i32 + 1;
        let entry = Submission {
            student: student.id,
            attempt,
            submitted_at: now,
            content,
            attachments: submission.attachments,
            marks: None,
            feedback: None,
            graded_at: None,
            graded_by: None,
            is_late: self.is_expired(now),
        };

        let attempts = self.submissions.entry(student.id).or_default();
        attempts.push(entry);
        Ok(&attempts[attempts.len() - 1])
    }

    /// Grades the student's latest attempt in place.
    pub fn grade(
        &mut self,
        student: UserId,
        grade: GradeRequest,
        grader: UserId,
        now: DateTime<Utc>,
    ) -> Result<&Submission, AssignmentError> {
        check_marks(grade.marks, self.total_marks)?;
        if let Some(feedback) = &grade.feedback {
            max_len("feedback", feedback, 1000)?;
        }

        let Some(submission) = self
            .submissions
            .get_mut(&student)
            .and_then(|s| s.last_mut())
        else {
            return Err(AssignmentError::SubmissionNotFound);
        };

        submission.marks = Some(grade.marks);
        submission.feedback = grade.feedback;
        submission.graded_at = Some(now);
        submission.graded_by = Some(grader);

        Ok(submission)
    }

    pub fn validate(&self) -> Result<(), AssignmentError> {
        require("title", &self.title)?;
        max_len("title", &self.title, 200)?;
        require("description", &self.description)?;
        max_len("description", &self.description, 2000)?;
        require("subject", &self.subject)?;
        max_len("subject", &self.subject, 100)?;
        in_range("totalMarks", self.total_marks as i64, 1, 1000)?;
        in_range("maxSubmissions", self.max_submissions as i64, 1, i32::MAX as i64)?;

        if let Some(instructions) = &self.instructions {
            max_len("instructions", instructions, 3000)?;
        }

        if !matches!(self.audience, Audience::All | Audience::Specific(_)) {
            return Err(ValidationError::Invalid(format!(
                "audience '{}' is not valid for assignments",
                self.audience.kind().as_str()
            ))
            .into());
        }

        for submission in self.submissions.values().flatten() {
            require("content", &submission.content)?;
            max_len("content", &submission.content, 5000)?;
            if let Some(marks) = submission.marks {
                check_marks(marks, self.total_marks)?;
            }
            if let Some(feedback) = &submission.feedback {
                max_len("feedback", feedback, 1000)?;
            }
        }

        Ok(())
    }
}

fn check_marks(marks: f32, total_marks: i32) -> Result<(), AssignmentError> {
    if !marks.is_finite() || marks < 0.0 {
        return Err(AssignmentError::InvalidMarks);
    }
    if marks > total_marks as f32 {
        return Err(AssignmentError::MarksExceedTotal);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{role::Role, user::tests::user};

    fn new_assignment(now: DateTime<Utc>) -> NewAssignment {
        NewAssignment {
            title: "Essay".into(),
            description: "Write about ownership".into(),
            subject: "Rust".into(),
            deadline: now + TimeDelta::days(1),
            total_marks: 100,
            audience: None,
            target_students: vec![],
            instructions: None,
            resources: vec![],
            allow_late_submission: None,
            max_submissions: None,
            auto_grade: None,
        }
    }

    fn submission(content: &str) -> NewSubmission {
        NewSubmission {
            content: content.into(),
            attachments: vec![],
        }
    }

    #[test]
    fn creation_applies_defaults() {
        let now = Utc::now();
        let a = new_assignment(now).into_assignment(9, now).unwrap();
        assert_eq!(a.status, Status::Active);
        assert_eq!(a.audience, Audience::All);
        assert!(a.allow_late_submission);
        assert_eq!(a.max_submissions, 1);
        assert_eq!(a.created_by, 9);
    }

    #[test]
    fn deadline_must_be_in_future() {
        let now = Utc::now();
        let mut req = new_assignment(now);
        req.deadline = now - TimeDelta::minutes(1);
        assert_eq!(
            req.into_assignment(9, now).unwrap_err(),
            AssignmentError::Validation(ValidationError::DeadlineNotInFuture)
        );
    }

    #[test]
    fn total_marks_range() {
        let now = Utc::now();
        let mut req = new_assignment(now);
        req.total_marks = 0;
        assert!(matches!(
            req.into_assignment(9, now),
            Err(AssignmentError::Validation(ValidationError::OutOfRange {
                field: "totalMarks",
                ..
            }))
        ));
    }

    #[test]
    fn submit_then_cap_reached() {
        let now = Utc::now();
        let mut a = new_assignment(now).into_assignment(9, now).unwrap();
        let student = user(1, Role::Student);

        let s = a.submit(&student, submission("answer"), now).unwrap();
        assert_eq!(s.attempt, 1);
        assert!(!s.is_late);

        assert!(!a.can_student_submit(student.id));
        assert_eq!(
            a.submit(&student, submission("again"), now).unwrap_err(),
            AssignmentError::CannotSubmit
        );
        assert_eq!(a.submission_count(), 1);
    }

    #[test]
    fn specific_audience_blocks_others() {
        let now = Utc::now();
        let mut req = new_assignment(now);
        req.audience = Some(AudienceKind::Specific);
        req.target_students = vec![1];
        let mut a = req.into_assignment(9, now).unwrap();

        assert_eq!(
            a.submit(&user(2, Role::Student), submission("x"), now)
                .unwrap_err(),
            AssignmentError::NotInAudience
        );
        assert!(a.submit(&user(1, Role::Student), submission("x"), now).is_ok());
    }

    #[test]
    fn refresh_status_expires_after_deadline() {
        let now = Utc::now();
        let mut a = new_assignment(now).into_assignment(9, now).unwrap();
        let later = a.deadline + TimeDelta::seconds(1);

        a.refresh_status(now);
        assert_eq!(a.status, Status::Active);

        a.refresh_status(later);
        assert_eq!(a.status, Status::Expired);
        assert_eq!(a.updated_at, later);
    }

    #[test]
    fn late_submission_honours_setting() {
        let now = Utc::now();
        let mut a = new_assignment(now).into_assignment(9, now).unwrap();
        let later = a.deadline + TimeDelta::hours(1);
        a.refresh_status(later);

        let student = user(1, Role::Student);
        let s = a.submit(&student, submission("late"), later).unwrap();
        assert!(s.is_late);

        let mut strict = new_assignment(now);
        strict.allow_late_submission = Some(false);
        let mut b = strict.into_assignment(9, now).unwrap();
        b.refresh_status(later);
        assert!(!b.can_student_submit(student.id));
    }

    #[test]
    fn draft_does_not_accept_submissions() {
        let now = Utc::now();
        let mut a = new_assignment(now).into_assignment(9, now).unwrap();
        a.status = Status::Draft;
        assert!(!a.can_student_submit(1));
        assert!(!a.visible_to(&user(1, Role::Student)));
    }

    #[test]
    fn grading_sets_fields_on_latest_attempt() {
        let now = Utc::now();
        let mut req = new_assignment(now);
        req.max_submissions = Some(2);
        let mut a = req.into_assignment(9, now).unwrap();
        let student = user(1, Role::Student);
        a.submit(&student, submission("first"), now).unwrap();
        a.submit(&student, submission("second"), now).unwrap();

        let grade = GradeRequest {
            marks: 80.0,
            feedback: Some("Good".into()),
        };
        let graded = a.grade(student.id, grade, 9, now).unwrap();
        assert_eq!(graded.attempt, 2);
        assert_eq!(graded.marks, Some(80.0));
        assert_eq!(graded.graded_by, Some(9));
        assert_eq!(a.submissions[&1][0].marks, None);
    }

    #[test]
    fn marks_above_total_fail() {
        let now = Utc::now();
        let mut a = new_assignment(now).into_assignment(9, now).unwrap();
        let student = user(1, Role::Student);
        a.submit(&student, submission("answer"), now).unwrap();

        let grade = GradeRequest {
            marks: 101.0,
            feedback: None,
        };
        assert_eq!(
            a.grade(student.id, grade, 9, now).unwrap_err(),
            AssignmentError::MarksExceedTotal
        );
        assert_eq!(a.submissions[&1][0].marks, None);

        a.submissions.get_mut(&1).unwrap()[0].marks = Some(150.0);
        assert_eq!(a.validate().unwrap_err(), AssignmentError::MarksExceedTotal);
    }

    #[test]
    fn grading_without_submission() {
        let now = Utc::now();
        let mut a = new_assignment(now).into_assignment(9, now).unwrap();
        let grade = GradeRequest {
            marks: 10.0,
            feedback: None,
        };
        assert_eq!(
            a.grade(1, grade, 9, now).unwrap_err(),
            AssignmentError::SubmissionNotFound
        );
    }
}
