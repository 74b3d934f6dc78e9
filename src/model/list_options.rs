//! Pagination and ordering for list operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::DatastoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

/// Paging and ordering requested by a caller of a list operation.
///
/// `page` is 0-based. A `per_page` of 0 disables paging and returns every
/// record from the first one on. Without an `order_key` records come back
/// ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub page: u32,
    pub per_page: u32,
    pub order_key: Option<String>,
    pub order_direction: OrderDirection,
}

impl ListOptions {
    pub fn page(page: u32, per_page: u32) -> Self {
        Self {
            page,
            per_page,
            ..Default::default()
        }
    }

    pub fn ordered_by<S: Into<String>>(mut self, key: S, direction: OrderDirection) -> Self {
        self.order_key = Some(key.into());
        self.order_direction = direction;
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> Option<u64> {
        if self.per_page == 0 {
            None
        } else {
            Some(u64::from(self.per_page))
        }
    }

    /// Returns the requested order key once it is known to be sortable for `T`.
    pub fn order_key_for<T: Sortable>(&self) -> Result<&str, DatastoreError> {
        let key = self.order_key.as_deref().unwrap_or("id");
        if T::ORDER_KEYS.contains(&key) {
            Ok(key)
        } else {
            Err(DatastoreError::invalid(format!(
                "cannot order {} by '{}'",
                T::KIND,
                key
            )))
        }
    }

    /// Sorts and pages an in-memory result set.
    pub fn apply<T: Sortable>(&self, mut items: Vec<T>) -> Result<Vec<T>, DatastoreError> {
        let key = self.order_key_for::<T>()?;
        items.sort_by(|a, b| {
            let ord = a.sort_value(key).cmp(&b.sort_value(key));
            // ties fall back to id so paging stays stable
            let ord = ord.then_with(|| a.sort_value("id").cmp(&b.sort_value("id")));
            match self.order_direction {
                OrderDirection::Ascending => ord,
                OrderDirection::Descending => ord.reverse(),
            }
        });
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let iter = items.into_iter().skip(offset);
        Ok(match self.limit() {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        })
    }
}

/// A comparable projection of one record field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortValue {
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

/// Records that can be returned by a list operation.
pub trait Sortable {
    /// Record kind used in error messages.
    const KIND: &'static str;
    /// Field names accepted as `ListOptions::order_key`.
    const ORDER_KEYS: &'static [&'static str];

    /// Value of `key`; only called with a member of `ORDER_KEYS`.
    fn sort_value(&self, key: &str) -> SortValue;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        id: u32,
        name: &'static str,
    }

    impl Sortable for Row {
        const KIND: &'static str = "row";
        const ORDER_KEYS: &'static [&'static str] = &["id", "name"];

        fn sort_value(&self, key: &str) -> SortValue {
            match key {
                "name" => SortValue::Text(self.name.to_string()),
                _ => SortValue::Int(i64::from(self.id)),
            }
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { id: 3, name: "charlie" },
            Row { id: 1, name: "bravo" },
            Row { id: 2, name: "alpha" },
        ]
    }

    #[test]
    fn test_default_orders_by_id() {
        let out = ListOptions::default().apply(rows()).unwrap();
        let ids: Vec<u32> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_order_by_name_descending() {
        let opts = ListOptions::default().ordered_by("name", OrderDirection::Descending);
        let out = opts.apply(rows()).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["charlie", "bravo", "alpha"]);
    }

    #[test]
    fn test_paging() {
        let out = ListOptions::page(1, 2).apply(rows()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 3);
        let past_end = ListOptions::page(5, 2).apply(rows()).unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn test_unknown_order_key_is_invalid() {
        let opts = ListOptions::default().ordered_by("password", OrderDirection::Ascending);
        let err = opts.apply(rows()).unwrap_err();
        assert!(matches!(err, DatastoreError::Invalid(_)));
    }
}
