use super::StorageGateway;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// In-memory `StorageGateway` used by tests and local development. Rows are
/// kept per-table as parsed JSON values in insertion order; `query` ignores
/// the SQL text and returns every row ever inserted across all tables
/// referenced in the query string, since there is no real SQL engine behind
/// it — good enough to assert on accepted/rejected counts and row shapes.
#[derive(Default)]
pub struct InMemoryStorageGateway {
    tables: DashMap<String, Vec<Value>>,
}

impl InMemoryStorageGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.get(table).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StorageGateway for InMemoryStorageGateway {
    async fn insert_ndjson(&self, table: &str, ndjson: String) -> Result<()> {
        let mut entry = self.tables.entry(table.to_string()).or_default();
        for line in ndjson.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)?;
            entry.push(value);
        }
        Ok(())
    }

    async fn query(&self, _sql: &str) -> Result<Vec<Value>> {
        let mut all = Vec::new();
        for entry in self.tables.iter() {
            all.extend(entry.value().clone());
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_row_count() {
        let store = InMemoryStorageGateway::new();
        store
            .insert_ndjson("spans", "{\"a\":1}\n{\"a\":2}\n".to_string())
            .await
            .unwrap();
        assert_eq!(store.row_count("spans"), 2);
    }

    #[tokio::test]
    async fn test_query_returns_all_rows() {
        let store = InMemoryStorageGateway::new();
        store.insert_ndjson("spans", "{\"a\":1}\n".to_string()).await.unwrap();
        store.insert_ndjson("traces", "{\"b\":2}\n".to_string()).await.unwrap();
        let rows = store.query("SELECT * FROM spans").await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
