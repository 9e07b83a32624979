use crate::error::Result;
use crate::model::HostStatsMinute;
use crate::sanitize::resolve_window;
use crate::store::StorageGateway;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::util::rows_to;
use super::QueryState;

#[derive(Debug, Deserialize)]
pub struct HostsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HostSummary {
    pub host: String,
    pub logs: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub distinct_services: u32,
    pub last_seen_ts: i64,
}

pub async fn get_hosts<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Query(q): Query<HostsQuery>,
) -> Result<Json<Value>> {
    let window = resolve_window(q.from.as_deref(), q.to.as_deref());
    let sql = format!(
        "SELECT * FROM host_stats_minute WHERE bucket_ts >= {} AND bucket_ts < {}",
        window.from.timestamp_millis(),
        window.to.timestamp_millis()
    );
    let rows = state.store.query(&sql).await?;
    let minutes = rows_to::<HostStatsMinute>(rows)?;

    #[derive(Default)]
    struct Acc {
        logs: u64,
        errors: u64,
        distinct_services: u32,
        last_seen_ts: i64,
    }

    let mut byhost: HashMap<String, Acc> = HashMap::new();
    for m in minutes {
        let acc = byhost.entry(m.host.clone()).or_default();
        acc.logs += m.logs;
        acc.errors += m.errors;
        acc.distinct_services = acc.distinct_services.max(m.distinct_services);
        acc.last_seen_ts = acc.last_seen_ts.max(m.last_seen_ts);
    }

    let mut hosts: Vec<HostSummary> = byhost
        .into_iter()
        .map(|(host, acc)| HostSummary {
            host,
            logs: acc.logs,
            errors: acc.errors,
            error_rate: if acc.logs > 0 {
                acc.errors as f64 / acc.logs as f64
            } else {
                0.0
            },
            distinct_services: acc.distinct_services,
            last_seen_ts: acc.last_seen_ts,
        })
        .collect();

    hosts.sort_by(|a, b| b.logs.cmp(&a.logs));
    hosts.truncate(2000);

    Ok(Json(json!({ "hosts": hosts })))
}
