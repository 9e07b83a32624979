use crate::model::{IngestEvent, RawLog};
use chrono::{DateTime, Utc};

/// Converts one wire-level `IngestEvent` into a persisted `RawLog` row and the
/// parsed event timestamp the reconstructor folds on. Returns an error only
/// when the event cannot be salvaged: a missing correlation id, or a
/// timestamp that was present but failed to parse.
pub fn normalize(raw_json: &str, event: IngestEvent, now: DateTime<Utc>) -> Result<(RawLog, DateTime<Utc>), String> {
    let trace_id = event.correlation_id.trim().to_string();
    if trace_id.is_empty() {
        return Err("missing correlationId".to_string());
    }

    let ts = match event.timestamp.as_deref().map(str::trim) {
        None | Some("") => now,
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("unparseable timestamp {s:?}: {e}"))?,
    };

    let service = non_empty_or(&event.service, "unknown-service");
    let env = non_empty_or(&event.env, "unknown-env");
    let host = non_empty_or(&event.host, "unknown-host");
    let version = non_empty_or(&event.version, "unknown-version");
    let level = non_empty_or(&event.level, "INFO").to_uppercase();
    let method = event.method.trim().to_uppercase();
    let evt = non_empty_or(&event.event, "log").to_lowercase();

    let mut attrs = event.attrs;
    if let Some(status) = event.status.as_deref() {
        if !status.trim().is_empty() {
            attrs.insert("status".to_string(), status.trim().to_uppercase());
        }
    }

    let row = RawLog {
        ts: ts.timestamp_millis(),
        ingest_ts: now.timestamp_millis(),
        service,
        env,
        host,
        version,
        level,
        message: event.message.trim().to_string(),
        trace_id,
        span_id: event.span_id.trim().to_string(),
        parent_span_id: event.parent_span_id.trim().to_string(),
        event: evt,
        route: event.route.trim().to_string(),
        method,
        status_code: event.status_code,
        duration_ms: event.duration_ms.max(0),
        attrs,
        raw_json: raw_json.to_string(),
    };

    Ok((row, ts))
}

fn non_empty_or(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}
