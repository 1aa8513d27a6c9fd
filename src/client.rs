//! Client-side session handling for front ends built on this crate.
//!
//! [`SessionStore`] owns the authentication state and the transient alert shown to the user.
//! It persists the token and role through one [`CredentialStore`], so signing out clears exactly
//! one place. Route access decisions live in [`guard`].

use crate::model::{
    role::{Permission, Role},
    user::User,
};

pub mod credentials;
pub mod guard;

use credentials::{Credential, CredentialError, CredentialStore};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub role: Role,
    pub permissions: Vec<Permission>,
    /// Only known after a login or a server check; a restored session has just the role.
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Checking,
    Anonymous,
    Authenticated(SessionUser),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

pub struct SessionStore<S: CredentialStore> {
    store: S,
    state: AuthState,
    alert: Option<Alert>,
}

impl<S: CredentialStore> SessionStore<S> {
    /// Starts in [`AuthState::Checking`] until [`SessionStore::restore`] runs.
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: AuthState::Checking,
            alert: None,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated(_))
    }

    pub fn role(&self) -> Option<Role> {
        match &self.state {
            AuthState::Authenticated(session) => Some(session.role),
            _ => None,
        }
    }

    /// The stored token, if a credential is present.
    pub fn token(&self) -> Option<String> {
        self.store.load().ok().flatten().map(|c| c.token)
    }

    /// Derives the state from the stored credential. An unreadable store counts as signed out.
    pub fn restore(&mut self) -> &AuthState {
        self.state = match self.store.load() {
            Ok(Some(credential)) => AuthState::Authenticated(SessionUser {
                role: credential.role,
                permissions: credential.role.default_permissions(),
                user: None,
            }),
            Ok(None) => AuthState::Anonymous,
            Err(e) => {
                tracing::warn!("Could not restore session: {e}");
                AuthState::Anonymous
            }
        };
        &self.state
    }

    /// Confirms the stored token with `check`, which returns the user the server knows it as.
    /// A rejected token signs the session out.
    pub fn verify<F>(&mut self, check: F) -> Result<&AuthState, CredentialError>
    where
        F: FnOnce(&str) -> Option<User>,
    {
        let Some(credential) = self.store.load()? else {
            self.state = AuthState::Anonymous;
            return Ok(&self.state);
        };

        match check(&credential.token) {
            Some(user) => {
                self.state = AuthState::Authenticated(SessionUser {
                    role: user.role,
                    permissions: user.permissions.clone(),
                    user: Some(user),
                });
            }
            None => self.logout()?,
        }

        Ok(&self.state)
    }

    /// Saves the credential and returns the landing route for the user's role.
    pub fn login(&mut self, token: String, user: User) -> Result<&'static str, CredentialError> {
        let role = user.role;
        self.store.save(&Credential { token, role })?;

        self.state = AuthState::Authenticated(SessionUser {
            role,
            permissions: user.permissions.clone(),
            user: Some(user),
        });
        Ok(role.home_route())
    }

    /// Forgets everything: state, alert, and the stored credential.
    pub fn logout(&mut self) -> Result<(), CredentialError> {
        self.state = AuthState::Anonymous;
        self.alert = None;
        self.store.clear()
    }

    pub fn set_alert(&mut self, severity: Severity, message: impl Into<String>) {
        self.alert = Some(Alert {
            severity,
            message: message.into(),
        });
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    /// Hands the alert to the caller and closes it.
    pub fn take_alert(&mut self) -> Option<Alert> {
        self.alert.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::credentials::MemoryCredentialStore,
        model::user::tests::user,
    };

    fn store_with(role: Role) -> MemoryCredentialStore {
        let mut store = MemoryCredentialStore::default();
        store
            .save(&Credential {
                token: "t".into(),
                role,
            })
            .unwrap();
        store
    }

    #[test]
    fn starts_checking_then_restores() {
        let mut session = SessionStore::new(store_with(Role::Student));
        assert_eq!(session.state(), &AuthState::Checking);

        session.restore();
        assert!(session.is_authenticated());
        assert_eq!(session.role(), Some(Role::Student));

        let mut empty = SessionStore::new(MemoryCredentialStore::default());
        assert_eq!(empty.restore(), &AuthState::Anonymous);
    }

    #[test]
    fn login_returns_home_route() {
        let mut session = SessionStore::new(MemoryCredentialStore::default());
        let home = session.login("jwt".into(), user(4, Role::Teacher)).unwrap();
        assert_eq!(home, "/teacher/dashboard");
        assert_eq!(session.token().as_deref(), Some("jwt"));
    }

    #[test]
    fn logout_empties_the_store() {
        let mut session = SessionStore::new(MemoryCredentialStore::default());
        session.login("jwt".into(), user(1, Role::Student)).unwrap();
        session.set_alert(Severity::Success, "Welcome");

        session.logout().unwrap();
        assert_eq!(session.state(), &AuthState::Anonymous);
        assert_eq!(session.token(), None);
        assert!(session.alert().is_none());

        session.restore();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn rejected_token_signs_out() {
        let mut session = SessionStore::new(store_with(Role::Teacher));
        session.restore();

        let state = session.verify(|_| None).unwrap();
        assert_eq!(state, &AuthState::Anonymous);
        assert_eq!(session.token(), None);
    }

    #[test]
    fn accepted_token_fills_in_user() {
        let mut session = SessionStore::new(store_with(Role::Teacher));
        session.verify(|token| {
            assert_eq!(token, "t");
            Some(user(8, Role::Teacher))
        })
        .unwrap();

        let AuthState::Authenticated(current) = session.state() else {
            panic!("session should be authenticated");
        };
        assert_eq!(current.user.as_ref().map(|u| u.id), Some(8));
    }

    #[test]
    fn alert_is_taken_once() {
        let mut session = SessionStore::new(MemoryCredentialStore::default());
        session.set_alert(Severity::Error, "Login failed");
        assert_eq!(
            session.take_alert().map(|a| a.severity),
            Some(Severity::Error)
        );
        assert_eq!(session.take_alert(), None);
    }
}
