use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::DatastoreError;
use crate::model::list_options::{SortValue, Sortable};

/// An enrolled osquery host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub detail_update_time: DateTime<Utc>,
    pub seen_time: DateTime<Utc>,
    pub node_key: String,
    pub host_name: String,
    pub uuid: String,
    pub platform: String,
    pub osquery_version: String,
    pub os_version: String,
    /// Seconds since boot
    pub uptime: i64,
    /// Bytes
    pub physical_memory: i64,
    pub primary_mac: String,
    pub primary_ip: String,
}

impl Host {
    pub fn validate(&self) -> Result<(), DatastoreError> {
        if self.uuid.trim().is_empty() {
            return Err(DatastoreError::invalid("host uuid must not be empty"));
        }
        if self.node_key.is_empty() {
            return Err(DatastoreError::invalid("host node key must not be empty"));
        }
        Ok(())
    }
}

impl Sortable for Host {
    const KIND: &'static str = "host";
    const ORDER_KEYS: &'static [&'static str] = &[
        "id",
        "created_at",
        "updated_at",
        "seen_time",
        "host_name",
        "platform",
    ];

    fn sort_value(&self, key: &str) -> SortValue {
        match key {
            "created_at" => SortValue::Time(self.created_at),
            "updated_at" => SortValue::Time(self.updated_at),
            "seen_time" => SortValue::Time(self.seen_time),
            "host_name" => SortValue::Text(self.host_name.clone()),
            "platform" => SortValue::Text(self.platform.clone()),
            _ => SortValue::Int(i64::from(self.id)),
        }
    }
}
