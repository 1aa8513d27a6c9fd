use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{
    UserId, ValidationError,
    role::{Role, UnknownVariant},
    user::User,
};

/// Who may act on an assignment or a poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "targets")]
pub enum Audience {
    #[default]
    All,
    Students,
    Teachers,
    Specific(BTreeSet<UserId>),
}

/// The audience name as clients send it, before the target list is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudienceKind {
    #[default]
    All,
    Students,
    Teachers,
    Specific,
}

impl Audience {
    /// Targets are only kept for `specific`; they are dropped otherwise.
    pub fn new(kind: AudienceKind, targets: Vec<UserId>) -> Result<Self, ValidationError> {
        Ok(match kind {
            AudienceKind::All => Audience::All,
            AudienceKind::Students => Audience::Students,
            AudienceKind::Teachers => Audience::Teachers,
            AudienceKind::Specific => {
                if targets.is_empty() {
                    return Err(ValidationError::Invalid(
                        "A specific audience needs at least one target".into(),
                    ));
                }
                Audience::Specific(targets.into_iter().collect())
            }
        })
    }

    pub fn kind(&self) -> AudienceKind {
        match self {
            Audience::All => AudienceKind::All,
            Audience::Students => AudienceKind::Students,
            Audience::Teachers => AudienceKind::Teachers,
            Audience::Specific(_) => AudienceKind::Specific,
        }
    }

    pub fn targets(&self) -> Vec<UserId> {
        match self {
            Audience::Specific(targets) => targets.iter().copied().collect(),
            _ => vec![],
        }
    }

    pub fn admits(&self, user: &User) -> bool {
        match self {
            Audience::All => true,
            Audience::Students => user.role == Role::Student,
            Audience::Teachers => user.role == Role::Teacher,
            Audience::Specific(targets) => targets.contains(&user.id),
        }
    }
}

impl AudienceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceKind::All => "all",
            AudienceKind::Students => "students",
            AudienceKind::Teachers => "teachers",
            AudienceKind::Specific => "specific",
        }
    }

    /// The role-wide audience matching `role`, if there is one.
    pub fn for_role(role: Role) -> Option<Self> {
        match role {
            Role::Student => Some(AudienceKind::Students),
            Role::Teacher => Some(AudienceKind::Teachers),
            Role::Admin => None,
        }
    }
}

impl FromStr for AudienceKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(AudienceKind::All),
            "students" => Ok(AudienceKind::Students),
            "teachers" => Ok(AudienceKind::Teachers),
            "specific" => Ok(AudienceKind::Specific),
            other => Err(UnknownVariant::new("audience", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::tests::user;

    #[test]
    fn specific_admits_only_targets() {
        let audience = Audience::new(AudienceKind::Specific, vec![3, 4]).unwrap();
        assert!(audience.admits(&user(3, Role::Student)));
        assert!(!audience.admits(&user(5, Role::Student)));
        assert_eq!(audience.targets(), vec![3, 4]);
    }

    #[test]
    fn role_audiences() {
        assert!(Audience::Students.admits(&user(1, Role::Student)));
        assert!(!Audience::Students.admits(&user(2, Role::Teacher)));
        assert!(Audience::Teachers.admits(&user(2, Role::Teacher)));
        assert!(Audience::All.admits(&user(3, Role::Admin)));
    }

    #[test]
    fn targets_dropped_unless_specific() {
        let audience = Audience::new(AudienceKind::All, vec![1, 2]).unwrap();
        assert_eq!(audience, Audience::All);
        assert!(Audience::new(AudienceKind::Specific, vec![]).is_err());
    }
}
