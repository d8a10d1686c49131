use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sign-in credentials.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// An authenticated backend user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl AuthUser {
    /// Canned user returned by the adapter when the wrapped client has no
    /// auth surface, so non-production callers never need to null-check.
    pub fn synthetic() -> Self {
        Self {
            id: Uuid::nil().to_string(),
            email: Some("offline@localhost".to_string()),
            role: Some("authenticated".to_string()),
        }
    }
}

/// A backend session: token plus its user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn synthetic() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: None,
            user: AuthUser::synthetic(),
        }
    }
}
