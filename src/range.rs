use crate::classify::SyncError;
use dash_types::{Predicate, Record, Scalar, Table, TabularStore};
use std::sync::Arc;

pub const PAGE_SIZE: usize = 2000;

/// Reads and clears date-bounded fact sets, reading page by page.
#[derive(Clone)]
pub struct RangeReader {
    store: Arc<dyn TabularStore>,
}

impl RangeReader {
    pub fn new(store: Arc<dyn TabularStore>) -> Self {
        Self { store }
    }

    /// All rows of `table` with `low <= field <= high`, ordered by `field`.
    ///
    /// Best effort: a failing page ends the read and the rows gathered so far are
    /// returned. The failure is only logged.
    pub async fn fetch_range(
        &self,
        table: Table,
        field: &str,
        low: &Scalar,
        high: &Scalar,
    ) -> Vec<Record> {
        let mut rows = Vec::new();
        let mut page = 0;
        loop {
            let offset = page * PAGE_SIZE;
            let batch = match self
                .store
                .select_range(table, field, low, high, offset, PAGE_SIZE)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    log::warn!(
                        "{table}: read of {field} in [{low}, {high}] stopped at page {page}, returning {} rows: {err}",
                        rows.len()
                    );
                    break;
                }
            };
            let last = batch.len() < PAGE_SIZE;
            rows.extend(batch);
            if last {
                break;
            }
            page += 1;
        }
        log::debug!("{table}: fetched {} rows in {} pages", rows.len(), page + 1);
        rows
    }

    /// Deletes every row of `table` with `low <= field <= high`, typically ahead of a
    /// re-import of that range. Not retried: the caller decides whether to run it again.
    pub async fn purge_range(
        &self,
        table: Table,
        field: &str,
        low: &Scalar,
        high: &Scalar,
    ) -> Result<(), SyncError> {
        let predicate = Predicate::Between {
            field: field.to_string(),
            low: low.clone(),
            high: high.clone(),
        };
        self.store
            .delete(table, &predicate)
            .await
            .map_err(|err| SyncError::from_store(table, err, None, 0, 1))?;
        log::info!("{table}: purged {field} in [{low}, {high}]");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClass;
    use crate::memory::{Call, MemoryStore};
    use dash_types::StoreError;
    use std::collections::HashSet;

    fn seeded(n: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Table::SalesFacts,
            (0..n).map(|i| {
                Record::new()
                    .with("date", format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1))
                    .with("product_id", format!("SKU-{i}"))
            }),
        );
        store
    }

    async fn read_all(store: Arc<MemoryStore>) -> Vec<Record> {
        RangeReader::new(store)
            .fetch_range(
                Table::SalesFacts,
                "date",
                &"2024-01-01".into(),
                &"2024-12-31".into(),
            )
            .await
    }

    #[tokio::test]
    async fn returns_every_row_exactly_once() {
        for n in [0, 1, PAGE_SIZE, PAGE_SIZE + 1, 3 * PAGE_SIZE] {
            let rows = read_all(seeded(n)).await;
            assert_eq!(rows.len(), n, "n = {n}");
            let ids: HashSet<_> = rows
                .iter()
                .map(|r| r.value("product_id").to_string())
                .collect();
            assert_eq!(ids.len(), n, "duplicates for n = {n}");
        }
    }

    #[tokio::test]
    async fn stops_after_short_or_empty_page() {
        let store = seeded(PAGE_SIZE + 1);
        read_all(store.clone()).await;
        assert_eq!(
            store.calls(),
            vec![
                Call::Select { table: Table::SalesFacts, offset: 0, limit: PAGE_SIZE },
                Call::Select { table: Table::SalesFacts, offset: PAGE_SIZE, limit: PAGE_SIZE },
            ]
        );

        let store = seeded(2 * PAGE_SIZE);
        read_all(store.clone()).await;
        assert_eq!(store.calls().len(), 3);
    }

    #[tokio::test]
    async fn failing_page_truncates_without_error() {
        let store = seeded(3 * PAGE_SIZE + 10);
        store.fail_with(|call| match call {
            Call::Select { offset, .. } if *offset == 2 * PAGE_SIZE => {
                Some(StoreError::status(503, "unavailable"))
            }
            _ => None,
        });
        let rows = read_all(store).await;
        assert_eq!(rows.len(), 2 * PAGE_SIZE);
    }

    #[tokio::test]
    async fn honours_inclusive_bounds() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Table::ServiceFacts,
            ["2024-03-31", "2024-04-01", "2024-04-30", "2024-05-01"]
                .map(|d| Record::new().with("date", d).with("agent_account", "a")),
        );
        let rows = RangeReader::new(store)
            .fetch_range(
                Table::ServiceFacts,
                "date",
                &"2024-04-01".into(),
                &"2024-04-30".into(),
            )
            .await;
        let dates: Vec<_> = rows.iter().map(|r| r.value("date").to_string()).collect();
        assert_eq!(dates, vec!["2024-04-01", "2024-04-30"]);
    }

    #[tokio::test]
    async fn purge_classifies_failures() {
        let store = seeded(10);
        let reader = RangeReader::new(store.clone());
        reader
            .purge_range(
                Table::SalesFacts,
                "date",
                &"2024-01-01".into(),
                &"2024-06-30".into(),
            )
            .await
            .unwrap();
        assert!(store
            .rows(Table::SalesFacts)
            .iter()
            .all(|r| r.value("date") > &Scalar::from("2024-06-30")));

        store.fail_with(|_| Some(StoreError::status(401, "JWT expired")));
        let err = reader
            .purge_range(
                Table::SalesFacts,
                "date",
                &"2024-01-01".into(),
                &"2024-12-31".into(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
        assert_eq!(
            store.calls(),
            vec![
                Call::Delete { table: Table::SalesFacts },
                Call::Delete { table: Table::SalesFacts },
            ]
        );
    }
}
