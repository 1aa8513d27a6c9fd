use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    UserId, ValidationError, max_len, require,
    role::{Permission, Role},
};

/// A user as the rest of the application sees it. The password hash stays in the database layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub student_id: Option<String>,
    pub teacher_id: Option<String>,
    pub permissions: Vec<Permission>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Admins, and holders of `all`, pass every permission check.
    pub fn has_permissions(&self, required: &[Permission]) -> bool {
        if self.role == Role::Admin || self.permissions.contains(&Permission::All) {
            return true;
        }
        required.iter().all(|p| self.permissions.contains(p))
    }
}

/// The subset of a user embedded in listings (the populated `student` of a submission, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub student_id: Option<String>,
}

/// One row of the teacher's student listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentEntry {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub student_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl NewUser {
    /// Trims and lowercases the email, drops blank optional fields, then checks the role-specific requirements.
    pub fn normalize(mut self) -> Result<Self, ValidationError> {
        self.full_name = self.full_name.trim().to_owned();
        self.email = self.email.trim().to_lowercase();
        self.department = non_blank(self.department);
        self.student_id = non_blank(self.student_id);
        self.teacher_id = non_blank(self.teacher_id);

        require("fullName", &self.full_name)?;
        require("email", &self.email)?;
        require("password", &self.password)?;
        max_len("fullName", &self.full_name, 200)?;

        if !self.email.contains('@') {
            return Err(ValidationError::Invalid(format!(
                "{} is not a valid email address",
                self.email
            )));
        }

        match self.role {
            Role::Student => {
                if self.student_id.is_none() {
                    return Err(ValidationError::Required("studentId"));
                }
            }
            Role::Teacher => {
                if self.department.is_none() {
                    return Err(ValidationError::Required("department"));
                }
                if self.teacher_id.is_none() {
                    return Err(ValidationError::Required("teacherId"));
                }
            }
            Role::Admin => {}
        }

        Ok(self)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn user(id: UserId, role: Role) -> User {
        let now = Utc::now();
        User {
            id,
            full_name: format!("User {id}"),
            email: format!("user{id}@example.com"),
            role,
            department: None,
            student_id: None,
            teacher_id: None,
            permissions: role.default_permissions(),
            image: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_user(role: Role) -> NewUser {
        NewUser {
            full_name: "  Ada Lovelace ".into(),
            email: " Ada@Example.COM ".into(),
            password: "hunter22".into(),
            role,
            department: None,
            student_id: None,
            teacher_id: None,
            image: None,
        }
    }

    #[test]
    fn normalize_lowercases_email() {
        let mut u = new_user(Role::Student);
        u.student_id = Some("S-1".into());
        let u = u.normalize().unwrap();
        assert_eq!(u.email, "ada@example.com");
        assert_eq!(u.full_name, "Ada Lovelace");
    }

    #[test]
    fn student_requires_student_id() {
        let err = new_user(Role::Student).normalize().unwrap_err();
        assert_eq!(err, ValidationError::Required("studentId"));

        let mut u = new_user(Role::Student);
        u.student_id = Some("   ".into());
        assert_eq!(
            u.normalize().unwrap_err(),
            ValidationError::Required("studentId")
        );
    }

    #[test]
    fn teacher_requires_department_and_teacher_id() {
        let mut u = new_user(Role::Teacher);
        u.teacher_id = Some("T-1".into());
        assert_eq!(
            u.clone().normalize().unwrap_err(),
            ValidationError::Required("department")
        );

        u.department = Some("Maths".into());
        assert!(u.normalize().is_ok());
    }

    #[test]
    fn admin_has_every_permission() {
        let admin = user(1, Role::Admin);
        assert!(admin.has_permissions(&[Permission::GradeAssignments, Permission::ManageTasks]));
    }

    #[test]
    fn permission_check_requires_all() {
        let teacher = user(2, Role::Teacher);
        assert!(teacher.has_permissions(&[Permission::CreatePolls]));
        assert!(!teacher.has_permissions(&[Permission::CreatePolls, Permission::ParticipatePolls]));
        assert!(teacher.has_permissions(&[]));
    }
}
