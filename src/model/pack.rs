use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::DatastoreError;
use crate::model::list_options::{SortValue, Sortable};

/// A named group of queries scheduled together on the hosts matched by its labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub platform: String,
}

impl Pack {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Pack {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DatastoreError> {
        if self.name.trim().is_empty() {
            return Err(DatastoreError::invalid("pack name must not be empty"));
        }
        Ok(())
    }
}

impl Sortable for Pack {
    const KIND: &'static str = "pack";
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
