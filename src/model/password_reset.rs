use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending password reset for one user, identified by an emailed token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_id: u32,
    pub token: String,
}

impl PasswordResetRequest {
    pub fn new<S: Into<String>>(user_id: u32, token: S, expires_at: DateTime<Utc>) -> Self {
        PasswordResetRequest {
            user_id,
            token: token.into(),
            expires_at,
            ..Default::default()
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
