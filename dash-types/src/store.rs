use crate::{ConflictKey, Record, Scalar, Table};
use async_trait::async_trait;
use derive_more::{Display, Error};

/// Hosted tabular store the dashboard reads facts from and writes imports to.
///
/// Implementations hold no per-call state, so one handle can be shared by any number of
/// concurrent callers.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Inserts `records`, updating rows that already exist under `conflict_key`.
    async fn upsert(
        &self,
        table: Table,
        records: &[Record],
        conflict_key: ConflictKey,
    ) -> Result<(), StoreError>;

    /// Rows with `low <= field <= high`, ordered by `field` ascending, windowed by
    /// `offset`/`limit`.
    async fn select_range(
        &self,
        table: Table,
        field: &str,
        low: &Scalar,
        high: &Scalar,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    async fn delete(&self, table: Table, predicate: &Predicate) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq {
        field: String,
        value: Scalar,
    },
    /// Inclusive on both ends.
    Between {
        field: String,
        low: Scalar,
        high: Scalar,
    },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::Between { field, .. } => field,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let value = record.value(self.field());
        match self {
            Self::Eq { value: v, .. } => value == v,
            Self::Between { low, high, .. } => {
                matches!(
                    value.partial_cmp(low),
                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                ) && matches!(
                    value.partial_cmp(high),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                )
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum TransportFailure {
    #[display("timeout")]
    Timeout,
    #[display("connection failure")]
    Connect,
    #[display("transport failure")]
    Other,
}

/// Failure reported by a [`TabularStore`], as structured as the store allows.
#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
#[display("{message}")]
pub struct StoreError {
    /// HTTP-like status, when the store answered at all.
    pub status: Option<u16>,
    /// Store-specific error code (e.g. a Postgres SQLSTATE).
    pub code: Option<String>,
    pub message: String,
    /// Set when the request never produced a response.
    pub transport: Option<TransportFailure>,
    /// Offending row within the submitted batch, if the store pinpoints it.
    pub row: Option<usize>,
}

impl StoreError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            transport: None,
            row: None,
        }
    }

    pub fn status<S: Into<String>>(status: u16, message: S) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    pub fn transport<S: Into<String>>(failure: TransportFailure, message: S) -> Self {
        Self {
            transport: Some(failure),
            ..Self::new(message)
        }
    }

    pub fn with_code<S: Into<String>>(self, code: S) -> Self {
        Self {
            code: Some(code.into()),
            ..self
        }
    }

    pub fn with_row(self, row: usize) -> Self {
        Self {
            row: Some(row),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_is_inclusive_and_kind_strict() {
        let p = Predicate::Between {
            field: "date".to_string(),
            low: "2024-01-01".into(),
            high: "2024-01-31".into(),
        };
        assert!(p.matches(&Record::new().with("date", "2024-01-01")));
        assert!(p.matches(&Record::new().with("date", "2024-01-31")));
        assert!(!p.matches(&Record::new().with("date", "2024-02-01")));
        assert!(!p.matches(&Record::new().with("date", 20240115i64)));
        assert!(!p.matches(&Record::new()));
    }
}
