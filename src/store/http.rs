use super::StorageGateway;
use crate::error::{AppError, Result};
use crate::metrics::STORE_REQUEST_DURATION_SECONDS;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Talks to an HTTP/JSON columnar analytics store (ClickHouse-shaped): inserts
/// post newline-delimited JSON to `/?query=INSERT INTO table FORMAT JSONEachRow`,
/// queries post the raw SQL with `FORMAT JSON` appended and parse the `data`
/// array of the response.
pub struct HttpStorageGateway {
    client: Client,
    dsn: String,
    database: String,
}

impl HttpStorageGateway {
    pub fn new(dsn: impl Into<String>, database: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build store client: {e}")))?;
        Ok(Self {
            client,
            dsn: dsn.into(),
            database: database.into(),
        })
    }
}

impl HttpStorageGateway {
    async fn insert_ndjson_inner(&self, table: &str, ndjson: String) -> Result<()> {
        let query = format!("INSERT INTO {table} FORMAT JSONEachRow");
        let response = self
            .client
            .post(&self.dsn)
            .query(&[("database", self.database.as_str()), ("query", query.as_str())])
            .body(ndjson)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "store insert into {table} failed with {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn query_inner(&self, sql: &str) -> Result<Vec<Value>> {
        let query = format!("{sql} FORMAT JSON");
        let response = self
            .client
            .post(&self.dsn)
            .query(&[("database", self.database.as_str())])
            .body(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "store query failed with {status}: {body}"
            )));
        }

        let body: Value = response.json().await?;
        match body.get("data") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl StorageGateway for HttpStorageGateway {
    async fn insert_ndjson(&self, table: &str, ndjson: String) -> Result<()> {
        let started = Instant::now();
        let result = self.insert_ndjson_inner(table, ndjson).await;
        let outcome = if result.is_ok() { "ok" } else { "err" };
        STORE_REQUEST_DURATION_SECONDS
            .with_label_values(&["insert", outcome])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn query(&self, sql: &str) -> Result<Vec<Value>> {
        let started = Instant::now();
        let result = self.query_inner(sql).await;
        let outcome = if result.is_ok() { "ok" } else { "err" };
        STORE_REQUEST_DURATION_SECONDS
            .with_label_values(&["query", outcome])
            .observe(started.elapsed().as_secs_f64());
        result
    }
}
