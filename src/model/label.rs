use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::DatastoreError;
use crate::model::list_options::{SortValue, Sortable};

/// A named query whose result decides host membership.
///
/// An empty `platform` applies the label to hosts of every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub description: String,
    pub query: String,
    pub platform: String,
}

impl Label {
    pub fn new<S: Into<String>>(name: S, query: S) -> Self {
        Label {
            name: name.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DatastoreError> {
        if self.name.trim().is_empty() {
            return Err(DatastoreError::invalid("label name must not be empty"));
        }
        if self.query.trim().is_empty() {
            return Err(DatastoreError::invalid("label query must not be empty"));
        }
        Ok(())
    }

    pub fn applies_to(&self, platform: &str) -> bool {
        self.platform.is_empty() || self.platform == platform
    }
}

impl Sortable for Label {
    const KIND: &'static str = "label";
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

/// Latest result of running one label query on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelQueryExecution {
    pub id: u32,
    pub updated_at: DateTime<Utc>,
    pub matches: bool,
    pub label_id: u32,
    pub host_id: u32,
}
