use crate::{
    client::AuthState,
    model::role::{Permission, Role},
};

pub const LOGIN_ROUTE: &str = "/login";
pub const UNAUTHORIZED_ROUTE: &str = "/unauthorized";

/// Who may open a client route, and where everyone else is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub allowed_roles: Vec<Role>,
    pub required_permissions: Vec<Permission>,
    /// Where anonymous users go.
    pub redirect_to: String,
}

impl Default for RouteRule {
    fn default() -> Self {
        Self {
            allowed_roles: vec![],
            required_permissions: vec![],
            redirect_to: LOGIN_ROUTE.into(),
        }
    }
}

impl RouteRule {
    pub fn roles(roles: &[Role]) -> Self {
        Self {
            allowed_roles: roles.to_vec(),
            ..Default::default()
        }
    }

    pub fn student_only() -> Self {
        Self::roles(&[Role::Student])
    }

    pub fn teacher_only() -> Self {
        Self::roles(&[Role::Teacher])
    }

    pub fn admin_only() -> Self {
        Self::roles(&[Role::Admin])
    }

    pub fn teacher_or_admin() -> Self {
        Self::roles(&[Role::Teacher, Role::Admin])
    }

    pub fn student_or_teacher() -> Self {
        Self::roles(&[Role::Student, Role::Teacher])
    }

    pub fn all_roles() -> Self {
        Self::roles(&Role::ALL)
    }

    /// Any signed-in role holding every one of `permissions`.
    pub fn with_permissions(permissions: &[Permission]) -> Self {
        Self {
            required_permissions: permissions.to_vec(),
            ..Default::default()
        }
    }

    pub fn redirect_to(mut self, path: impl Into<String>) -> Self {
        self.redirect_to = path.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The session is still being restored.
    Wait,
    Render,
    Redirect(String),
}

pub fn guard(state: &AuthState, rule: &RouteRule) -> GuardDecision {
    let session = match state {
        AuthState::Checking => return GuardDecision::Wait,
        AuthState::Anonymous => return GuardDecision::Redirect(rule.redirect_to.clone()),
        AuthState::Authenticated(session) => session,
    };

    if !rule.allowed_roles.is_empty() && !rule.allowed_roles.contains(&session.role) {
        return GuardDecision::Redirect(session.role.home_route().into());
    }

    if session.role != Role::Admin
        && !session.permissions.contains(&Permission::All)
        && !rule
            .required_permissions
            .iter()
            .all(|p| session.permissions.contains(p))
    {
        return GuardDecision::Redirect(UNAUTHORIZED_ROUTE.into());
    }

    GuardDecision::Render
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionUser;

    fn signed_in(role: Role) -> AuthState {
        AuthState::Authenticated(SessionUser {
            role,
            permissions: role.default_permissions(),
            user: None,
        })
    }

    #[test]
    fn checking_waits() {
        assert_eq!(
            guard(&AuthState::Checking, &RouteRule::all_roles()),
            GuardDecision::Wait
        );
    }

    #[test]
    fn anonymous_goes_to_redirect_target() {
        assert_eq!(
            guard(&AuthState::Anonymous, &RouteRule::teacher_only()),
            GuardDecision::Redirect("/login".into())
        );
        assert_eq!(
            guard(
                &AuthState::Anonymous,
                &RouteRule::teacher_only().redirect_to("/welcome")
            ),
            GuardDecision::Redirect("/welcome".into())
        );
    }

    #[test]
    fn wrong_role_goes_home() {
        assert_eq!(
            guard(&signed_in(Role::Student), &RouteRule::teacher_only()),
            GuardDecision::Redirect("/profile".into())
        );
        assert_eq!(
            guard(&signed_in(Role::Teacher), &RouteRule::admin_only()),
            GuardDecision::Redirect("/teacher/dashboard".into())
        );
        assert_eq!(
            guard(&signed_in(Role::Admin), &RouteRule::student_or_teacher()),
            GuardDecision::Redirect("/dashboard".into())
        );
    }

    #[test]
    fn missing_permission_is_unauthorized() {
        let rule = RouteRule::with_permissions(&[Permission::GradeAssignments]);
        assert_eq!(
            guard(&signed_in(Role::Student), &rule),
            GuardDecision::Redirect("/unauthorized".into())
        );
        assert_eq!(guard(&signed_in(Role::Teacher), &rule), GuardDecision::Render);
        assert_eq!(guard(&signed_in(Role::Admin), &rule), GuardDecision::Render);
    }

    #[test]
    fn allowed_role_renders() {
        assert_eq!(
            guard(&signed_in(Role::Teacher), &RouteRule::teacher_or_admin()),
            GuardDecision::Render
        );
        assert_eq!(
            guard(&signed_in(Role::Student), &RouteRule::student_only()),
            GuardDecision::Render
        );
    }
}
