use std::collections::HashMap;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_USER_NAME_LEN;

/// Login credentials. When any per-user password is configured only those
/// users may log in; otherwise every user name shares one password.
#[derive(Debug, Clone)]
pub struct Credentials {
    shared_password: String,
    users: HashMap<String, String>,
}

impl Credentials {
    pub fn shared(password: impl Into<String>) -> Self {
        Self {
            shared_password: password.into(),
            users: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(user.into(), password.into());
        self
    }

    pub fn password_for(&self, user: &str) -> Option<&str> {
        if user.is_empty() || user.len() > MAX_USER_NAME_LEN {
            return None;
        }
        if self.users.is_empty() {
            return Some(&self.shared_password);
        }
        self.users.get(user).map(String::as_str)
    }
}

#[derive(Debug)]
pub struct OpsHoursAuthSource {
    credentials: Credentials,
}

impl OpsHoursAuthSource {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl AuthSource for OpsHoursAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        match self.credentials.password_for(user) {
            Some(password) => Ok(Password::new(None, password.as_bytes().to_vec())),
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                tracing::warn!("login rejected for unknown user {user:?}");
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28000".into(),
                    format!("unknown user: {user}"),
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_password_accepts_any_user() {
        let creds = Credentials::shared("secret");
        assert_eq!(creds.password_for("alice"), Some("secret"));
        assert_eq!(creds.password_for("bob"), Some("secret"));
    }

    #[test]
    fn per_user_passwords_restrict_logins() {
        let creds = Credentials::shared("secret")
            .with_user("alice", "a-pw")
            .with_user("bob", "b-pw");
        assert_eq!(creds.password_for("alice"), Some("a-pw"));
        assert_eq!(creds.password_for("bob"), Some("b-pw"));
        assert_eq!(creds.password_for("mallory"), None);
    }

    #[test]
    fn rejects_empty_and_oversized_names() {
        let creds = Credentials::shared("secret");
        assert_eq!(creds.password_for(""), None);
        assert_eq!(creds.password_for(&"x".repeat(MAX_USER_NAME_LEN + 1)), None);
        assert!(creds.password_for(&"x".repeat(MAX_USER_NAME_LEN)).is_some());
    }
}
