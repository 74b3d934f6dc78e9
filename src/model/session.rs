use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A login session. `key` is the bearer secret handed to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub user_id: u32,
    pub key: String,
}

impl Session {
    pub fn new<S: Into<String>>(user_id: u32, key: S) -> Self {
        Session {
            user_id,
            key: key.into(),
            ..Default::default()
        }
    }
}
