use dash_types::{StoreError, Table, TransportFailure};
use derive_more::{Display, Error};
use lazy_regex::regex_is_match;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ErrorClass {
    /// Payload too large or store overloaded. Mitigated by shrinking the batch.
    #[display("capacity exceeded")]
    CapacityExceeded,
    #[display("permission denied")]
    PermissionDenied,
    /// Network hiccup. Mitigated by retrying after a pause.
    #[display("transient failure")]
    Transient,
    #[display("validation failure")]
    Validation,
}

const INSUFFICIENT_PRIVILEGE: &str = "42501";
const QUERY_CANCELED: &str = "57014";

/// Maps a store failure onto exactly one [`ErrorClass`].
///
/// Structured signals (transport kind, status, SQLSTATE) win over the message text; the
/// text is only consulted for stores that report nothing else. Anything unrecognised is
/// `Validation` so it is never retried blindly.
pub fn classify(err: &StoreError) -> ErrorClass {
    let code = err.code.as_deref();
    let message = err.message.as_str();

    if matches!(err.status, Some(401 | 403))
        || code == Some(INSUFFICIENT_PRIVILEGE)
        || regex_is_match!(r"(?i)row[- ]level security|permission denied", message)
    {
        return ErrorClass::PermissionDenied;
    }

    match err.transport {
        Some(TransportFailure::Timeout) => return ErrorClass::CapacityExceeded,
        Some(TransportFailure::Connect | TransportFailure::Other) => return ErrorClass::Transient,
        None => (),
    }

    match err.status {
        Some(413) => return ErrorClass::CapacityExceeded,
        Some(s) if (500..600).contains(&s) => return ErrorClass::CapacityExceeded,
        Some(408 | 429) => return ErrorClass::Transient,
        _ => (),
    }

    if code == Some(QUERY_CANCELED)
        || regex_is_match!(
            r"(?i)payload too large|entity too large|statement timeout|too many rows",
            message
        )
    {
        return ErrorClass::CapacityExceeded;
    }
    if regex_is_match!(r"(?i)timed? ?out|connection (reset|refused|closed)", message) {
        return ErrorClass::Transient;
    }
    ErrorClass::Validation
}

/// Terminal outcome of a sync call, after every mitigation has been spent.
///
/// Batches written before the failure stay written.
#[derive(Clone, Debug, Error)]
pub enum SyncError {
    CapacityExceeded {
        table: Table,
        offset: usize,
        chunk_size: usize,
        source: StoreError,
    },
    Transient {
        table: Table,
        offset: usize,
        attempts: usize,
        source: StoreError,
    },
    PermissionDenied {
        table: Table,
        source: StoreError,
    },
    Validation {
        table: Table,
        row: Option<usize>,
        message: String,
    },
}

impl SyncError {
    /// Wraps a store failure in the variant its class calls for. `position` is the index
    /// of the first record of the failed batch, when there was one.
    pub fn from_store(
        table: Table,
        source: StoreError,
        position: Option<usize>,
        chunk_size: usize,
        attempts: usize,
    ) -> Self {
        let offset = position.unwrap_or(0);
        match classify(&source) {
            ErrorClass::CapacityExceeded => Self::CapacityExceeded {
                table,
                offset,
                chunk_size,
                source,
            },
            ErrorClass::Transient => Self::Transient {
                table,
                offset,
                attempts,
                source,
            },
            ErrorClass::PermissionDenied => Self::PermissionDenied { table, source },
            ErrorClass::Validation => Self::Validation {
                table,
                row: position.map(|p| p + source.row.unwrap_or(0)),
                message: source.message,
            },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CapacityExceeded { .. } => ErrorClass::CapacityExceeded,
            Self::Transient { .. } => ErrorClass::Transient,
            Self::PermissionDenied { .. } => ErrorClass::PermissionDenied,
            Self::Validation { .. } => ErrorClass::Validation,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            Self::CapacityExceeded { table, .. }
            | Self::Transient { table, .. }
            | Self::PermissionDenied { table, .. }
            | Self::Validation { table, .. } => *table,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExceeded {
                table,
                offset,
                chunk_size,
                source,
            } => write!(
                f,
                "{table}: store rejected {chunk_size} records starting at row {offset} even at minimum batch size: {source}"
            ),
            Self::Transient {
                table,
                offset,
                attempts,
                source,
            } => write!(
                f,
                "{table}: gave up on batch at row {offset} after {attempts} attempts: {source}"
            ),
            Self::PermissionDenied { table, source } if source.status == Some(401) => write!(
                f,
                "{table}: store refused the credentials ({source}); check STORE_KEY"
            ),
            Self::PermissionDenied { table, source } => write!(
                f,
                "{table}: write rejected by store policy ({source}); grant insert and update on \"{table}\" to the API role or relax its row-level security policy"
            ),
            Self::Validation {
                table,
                row: Some(row),
                message,
            } => write!(f, "{table}: invalid data near row {row}: {message}"),
            Self::Validation {
                table,
                row: None,
                message,
            } => write!(f, "{table}: invalid data: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_structured_signals() {
        assert_eq!(
            classify(&StoreError::status(413, "Request Entity Too Large")),
            ErrorClass::CapacityExceeded
        );
        assert_eq!(
            classify(&StoreError::status(502, "Bad gateway")),
            ErrorClass::CapacityExceeded
        );
        assert_eq!(
            classify(&StoreError::transport(TransportFailure::Timeout, "operation timed out")),
            ErrorClass::CapacityExceeded
        );
        assert_eq!(
            classify(&StoreError::transport(TransportFailure::Connect, "dns error")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&StoreError::status(429, "slow down")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&StoreError::status(403, "forbidden")),
            ErrorClass::PermissionDenied
        );
        assert_eq!(
            classify(&StoreError::status(400, "nope").with_code("42501")),
            ErrorClass::PermissionDenied
        );
        assert_eq!(
            classify(&StoreError::status(400, "canceling statement").with_code("57014")),
            ErrorClass::CapacityExceeded
        );
    }

    #[test]
    fn permission_wins_over_server_status() {
        let err = StoreError::status(500, "new row violates row-level security policy");
        assert_eq!(classify(&err), ErrorClass::PermissionDenied);
    }

    #[test]
    fn falls_back_to_message_then_validation() {
        assert_eq!(
            classify(&StoreError::new("payload too large")),
            ErrorClass::CapacityExceeded
        );
        assert_eq!(
            classify(&StoreError::new("connection reset by peer")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&StoreError::status(400, "invalid input syntax for type date")),
            ErrorClass::Validation
        );
        assert_eq!(classify(&StoreError::new("")), ErrorClass::Validation);
    }

    #[test]
    fn validation_position_adds_row_within_batch() {
        let err = SyncError::from_store(
            Table::SalesFacts,
            StoreError::status(400, "bad value").with_row(7),
            Some(200),
            50,
            1,
        );
        match &err {
            SyncError::Validation { row, .. } => assert_eq!(*row, Some(207)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.to_string(), "sales_facts: invalid data near row 207: bad value");
    }

    #[test]
    fn permission_message_points_at_store_policy() {
        let err = SyncError::from_store(
            Table::Products,
            StoreError::status(403, "new row violates row-level security policy").with_code("42501"),
            Some(0),
            100,
            1,
        );
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
        assert!(err.to_string().contains("relax its row-level security policy"));
    }

    #[test]
    fn rejected_credentials_point_at_the_key() {
        let err = SyncError::from_store(
            Table::Products,
            StoreError::status(401, "JWT expired"),
            Some(0),
            100,
            1,
        );
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
        let message = err.to_string();
        assert!(message.contains("check STORE_KEY"), "{message}");
        assert!(!message.contains("row-level security"), "{message}");
    }
}
