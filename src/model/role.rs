use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The three roles a user can hold. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Teacher, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    /// Permissions granted to a freshly created user of this role
    pub fn default_permissions(&self) -> Vec<Permission> {
        use Permission::*;
        match self {
            Role::Student => vec![
                ReadPosts,
                CreatePosts,
                ManageTasks,
                SubmitAssignments,
                ParticipatePolls,
            ],
            Role::Teacher => vec![
                ReadPosts,
                CreatePosts,
                CreateAssignments,
                CreatePolls,
                ManageResources,
                GradeAssignments,
            ],
            Role::Admin => vec![All],
        }
    }

    /// Where a user of this role lands after login, or when a route refuses their role.
    pub fn home_route(&self) -> &'static str {
        match self {
            Role::Student => "/profile",
            Role::Teacher => "/teacher/dashboard",
            Role::Admin => "/dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

/// A fine-grained capability, independent of role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadPosts,
    CreatePosts,
    ManageTasks,
    SubmitAssignments,
    ParticipatePolls,
    CreateAssignments,
    CreatePolls,
    ManageResources,
    GradeAssignments,
    All,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadPosts => "read_posts",
            Permission::CreatePosts => "create_posts",
            Permission::ManageTasks => "manage_tasks",
            Permission::SubmitAssignments => "submit_assignments",
            Permission::ParticipatePolls => "participate_polls",
            Permission::CreateAssignments => "create_assignments",
            Permission::CreatePolls => "create_polls",
            Permission::ManageResources => "manage_resources",
            Permission::GradeAssignments => "grade_assignments",
            Permission::All => "all",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "read_posts" => Permission::ReadPosts,
            "create_posts" => Permission::CreatePosts,
            "manage_tasks" => Permission::ManageTasks,
            "submit_assignments" => Permission::SubmitAssignments,
            "participate_polls" => Permission::ParticipatePolls,
            "create_assignments" => Permission::CreateAssignments,
            "create_polls" => Permission::CreatePolls,
            "manage_resources" => Permission::ManageResources,
            "grade_assignments" => Permission::GradeAssignments,
            "all" => Permission::All,
            other => return Err(UnknownVariant::new("permission", other)),
        })
    }
}

/// Joins names for the "Required: a, b" style messages.
pub fn join_names<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_its_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("user".parse::<Role>().is_err());
    }

    #[test]
    fn default_permissions_follow_role() {
        assert!(Role::Student
            .default_permissions()
            .contains(&Permission::ParticipatePolls));
        assert!(!Role::Student
            .default_permissions()
            .contains(&Permission::GradeAssignments));
        assert!(Role::Teacher
            .default_permissions()
            .contains(&Permission::GradeAssignments));
        assert_eq!(Role::Admin.default_permissions(), vec![Permission::All]);
    }

    #[test]
    fn home_routes() {
        assert_eq!(Role::Student.home_route(), "/profile");
        assert_eq!(Role::Teacher.home_route(), "/teacher/dashboard");
        assert_eq!(Role::Admin.home_route(), "/dashboard");
    }

    #[test]
    fn permission_serializes_snake_case() {
        let json = serde_json::to_string(&Permission::SubmitAssignments).unwrap();
        assert_eq!(json, r#""submit_assignments""#);
        assert_eq!(
            "grade_assignments".parse::<Permission>(),
            Ok(Permission::GradeAssignments)
        );
    }
}
