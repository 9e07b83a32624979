mod http;
mod memory;

pub use http::HttpStorageGateway;
pub use memory::InMemoryStorageGateway;

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Transport to the columnar analytics store. Implementors only move bytes;
/// query composition (filters, sorting, sanitization) lives in the callers.
/// Kept object-safe (no generic methods) so it can be shared behind an
/// `Arc<dyn StorageGateway>` in application state.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Inserts pre-serialized newline-delimited JSON rows into `table`.
    async fn insert_ndjson(&self, table: &str, ndjson: String) -> Result<()>;

    /// Runs a query composed by the caller, returning row-maps.
    async fn query(&self, sql: &str) -> Result<Vec<Value>>;
}

/// Serializes `rows` to newline-delimited JSON for `StorageGateway::insert_ndjson`.
pub fn to_ndjson<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut buf = String::new();
    for row in rows {
        let line = serde_json::to_string(row).map_err(AppError::from)?;
        buf.push_str(&line);
        buf.push('\n');
    }
    Ok(buf)
}

/// Convenience wrapper calling [`to_ndjson`] then [`StorageGateway::insert_ndjson`].
pub async fn insert_rows<G: StorageGateway + ?Sized, T: Serialize>(
    gateway: &G,
    table: &str,
    rows: &[T],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let ndjson = to_ndjson(rows)?;
    gateway.insert_ndjson(table, ndjson).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        a: i32,
    }

    #[test]
    fn test_to_ndjson_joins_with_newlines() {
        let rows = vec![Row { a: 1 }, Row { a: 2 }];
        let out = to_ndjson(&rows).unwrap();
        assert_eq!(out, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_to_ndjson_empty() {
        let rows: Vec<Row> = vec![];
        assert_eq!(to_ndjson(&rows).unwrap(), "");
    }
}
