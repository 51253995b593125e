use async_trait::async_trait;
use dash_types::{ConflictKey, Predicate, Record, Scalar, StoreError, Table, TabularStore};
use std::collections::HashMap;
use std::sync::Mutex;

/// Request as seen by [`MemoryStore`], in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Upsert { table: Table, len: usize },
    Select { table: Table, offset: usize, limit: usize },
    Delete { table: Table },
}

type FailureRule = Box<dyn FnMut(&Call) -> Option<StoreError> + Send>;

/// Process-local [`TabularStore`] with real upsert-on-conflict semantics.
///
/// Backs dry runs and tests. A failure rule can reject any call before it touches the
/// data.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<Record>>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Option<FailureRule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every call for which `rule` returns an error.
    pub fn fail_with<F>(&self, rule: F)
    where
        F: FnMut(&Call) -> Option<StoreError> + Send + 'static,
    {
        *lock(&self.failures) = Some(Box::new(rule));
    }

    /// Puts rows in place as-is, bypassing conflict handling.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Record>) {
        lock(&self.tables).entry(table).or_default().extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Record> {
        lock(&self.tables).get(&table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    fn admit(&self, call: Call) -> Result<(), StoreError> {
        lock(&self.calls).push(call.clone());
        match lock(&self.failures).as_mut().and_then(|rule| rule(&call)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn same_key(a: &Record, b: &Record, key: ConflictKey) -> bool {
    key.fields().iter().all(|f| a.value(f) == b.value(f))
}

#[async_trait]
impl TabularStore for MemoryStore {
    async fn upsert(
        &self,
        table: Table,
        records: &[Record],
        conflict_key: ConflictKey,
    ) -> Result<(), StoreError> {
        self.admit(Call::Upsert {
            table,
            len: records.len(),
        })?;
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table).or_default();
        for record in records {
            match rows.iter_mut().find(|r| same_key(r, record, conflict_key)) {
                Some(existing) => *existing = record.clone(),
                None => rows.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn select_range(
        &self,
        table: Table,
        field: &str,
        low: &Scalar,
        high: &Scalar,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        self.admit(Call::Select {
            table,
            offset,
            limit,
        })?;
        let predicate = Predicate::Between {
            field: field.to_string(),
            low: low.clone(),
            high: high.clone(),
        };
        let mut rows: Vec<Record> = lock(&self.tables)
            .get(&table)
            .map(|rows| rows.iter().filter(|r| predicate.matches(r)).cloned().collect())
            .unwrap_or_default();
        let order = table.sort_fields(field);
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|f| {
                    a.value(f)
                        .partial_cmp(b.value(f))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, table: Table, predicate: &Predicate) -> Result<(), StoreError> {
        self.admit(Call::Delete { table })?;
        if let Some(rows) = lock(&self.tables).get_mut(&table) {
            rows.retain(|r| !predicate.matches(r));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_rows_with_equal_keys() {
        let store = MemoryStore::new();
        let key = Table::AppConfig.conflict_key();
        let row = |v: &str| Record::new().with("key", "currency").with("value", v);
        store.upsert(Table::AppConfig, &[row("USD")], key).await.unwrap();
        store.upsert(Table::AppConfig, &[row("UAH")], key).await.unwrap();
        let rows = store.rows(Table::AppConfig);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("value"), &Scalar::from("UAH"));
    }

    #[tokio::test]
    async fn range_reads_order_ties_by_conflict_key() {
        let store = MemoryStore::new();
        store.seed(
            Table::SalesFacts,
            ["C", "A", "B"].map(|p| Record::new().with("date", "2024-01-01").with("product_id", p)),
        );
        let (low, high) = (Scalar::from("2024-01-01"), Scalar::from("2024-01-01"));
        let mut seen = vec![];
        for offset in 0..3 {
            let page = store
                .select_range(Table::SalesFacts, "date", &low, &high, offset, 1)
                .await
                .unwrap();
            seen.push(page[0].value("product_id").clone());
        }
        assert_eq!(seen, ["A", "B", "C"].map(Scalar::from));
    }

    #[tokio::test]
    async fn delete_removes_matching_rows_only() {
        let store = MemoryStore::new();
        store.seed(
            Table::SalesFacts,
            ["2024-01-01", "2024-01-15", "2024-02-01"]
                .map(|d| Record::new().with("date", d).with("product_id", "A")),
        );
        store
            .delete(
                Table::SalesFacts,
                &Predicate::Between {
                    field: "date".to_string(),
                    low: "2024-01-01".into(),
                    high: "2024-01-31".into(),
                },
            )
            .await
            .unwrap();
        let rows = store.rows(Table::SalesFacts);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("date"), &Scalar::from("2024-02-01"));
        assert_eq!(store.calls(), vec![Call::Delete { table: Table::SalesFacts }]);
    }
}
