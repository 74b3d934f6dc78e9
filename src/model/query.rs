use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::DatastoreError;
use crate::model::list_options::{SortValue, Sortable};

/// A saved osquery query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub saved: bool,
    pub name: String,
    pub description: String,
    pub query: String,
    /// Scheduling interval in seconds
    pub interval: u32,
    pub snapshot: bool,
    pub differential: bool,
    pub platform: String,
    pub version: String,
}

impl Query {
    pub fn new<S: Into<String>>(name: S, query: S) -> Self {
        Query {
            name: name.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DatastoreError> {
        if self.name.trim().is_empty() {
            return Err(DatastoreError::invalid("query name must not be empty"));
        }
        if self.query.trim().is_empty() {
            return Err(DatastoreError::invalid("query text must not be empty"));
        }
        Ok(())
    }
}

impl Sortable for Query {
    const KIND: &'static str = "query";
    const ORDER_KEYS: &'static [&'static str] = &["id", "created_at", "updated_at", "name"];

    fn sort_value(&self, key: &str) -> SortValue {
        match key {
            "created_at" => SortValue::Time(self.created_at),
            "updated_at" => SortValue::Time(self.updated_at),
            "name" => SortValue::Text(self.name.clone()),
            _ => SortValue::Int(i64::from(self.id)),
        }
    }
}
