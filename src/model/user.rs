use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error_handling::types::DatastoreError;
use crate::model::list_options::{SortValue, Sortable};
use crate::utils::token;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"))
}

/// A Kolide user account.
///
/// `password` holds an Argon2 PHC string, never the plaintext. It is left out
/// of serialized output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub name: String,
    pub email: String,
    pub admin: bool,
    pub enabled: bool,
    pub admin_forced_password_reset: bool,
    pub gravatar_url: String,
    pub position: String,
}

impl User {
    /// Builds an enabled, non-admin user with a hashed password.
    pub fn new(username: &str, plaintext: &str, email: &str) -> Result<Self, DatastoreError> {
        let now = Utc::now();
        let mut user = User {
            created_at: now,
            updated_at: now,
            username: username.to_string(),
            email: email.to_string(),
            enabled: true,
            ..Default::default()
        };
        user.set_password(plaintext)?;
        Ok(user)
    }

    pub fn set_password(&mut self, plaintext: &str) -> Result<(), DatastoreError> {
        if plaintext.is_empty() {
            return Err(DatastoreError::invalid("password must not be empty"));
        }
        self.password = token::hash_password(plaintext)?;
        Ok(())
    }

    pub fn validate_password(&self, plaintext: &str) -> Result<(), DatastoreError> {
        if token::verify_password(plaintext, &self.password)? {
            Ok(())
        } else {
            Err(DatastoreError::InvalidPassword)
        }
    }

    pub fn validate(&self) -> Result<(), DatastoreError> {
        if self.username.trim().is_empty() {
            return Err(DatastoreError::invalid("username must not be empty"));
        }
        if !email_pattern().is_match(&self.email) {
            return Err(DatastoreError::invalid(format!(
                "'{}' is not a valid email address",
                self.email
            )));
        }
        if self.password.is_empty() {
            return Err(DatastoreError::invalid("user has no password set"));
        }
        Ok(())
    }
}

impl Sortable for User {
    const KIND: &'static str = "user";
    const ORDER_KEYS: &'static [&'static str] =
        &["id", "created_at", "updated_at", "username", "name", "email"];

    fn sort_value(&self, key: &str) -> SortValue {
        match key {
            "created_at" => SortValue::Time(self.created_at),
            "updated_at" => SortValue::Time(self.updated_at),
            "username" => SortValue::Text(self.username.clone()),
            "name" => SortValue::Text(self.name.clone()),
            "email" => SortValue::Text(self.email.clone()),
            _ => SortValue::Int(i64::from(self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_hashes_password() {
        let user = User::new("admin", "secret", "admin@kolide.co").unwrap();
        assert_ne!(user.password, "secret");
        assert!(user.enabled);
        assert!(!user.admin);
        user.validate_password("secret").unwrap();
        let err = user.validate_password("nope").unwrap_err();
        assert!(matches!(err, DatastoreError::InvalidPassword));
    }

    #[test]
    fn test_set_password_replaces_hash() {
        let mut user = User::new("admin", "first", "admin@kolide.co").unwrap();
        let before = user.password.clone();
        user.set_password("second").unwrap();
        assert_ne!(before, user.password);
        assert!(user.validate_password("first").is_err());
        user.validate_password("second").unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_email() {
        let user = User::new("admin", "secret", "not-an-email").unwrap();
        assert!(matches!(user.validate(), Err(DatastoreError::Invalid(_))));
    }

    #[test]
    fn test_password_is_not_serialized() {
        let user = User::new("admin", "secret", "admin@kolide.co").unwrap();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"username\":\"admin\""));
    }
}
