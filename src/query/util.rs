use crate::error::{AppError, Result};
use crate::sanitize::sanitize_token;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Converts the store's row-maps into typed values, failing the whole
/// request if any row doesn't match the expected shape.
pub fn rows_to<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|v| serde_json::from_value(v).map_err(AppError::from))
        .collect()
}

/// Sanitizes `id`, failing the request if nothing safe remains.
pub fn require_safe(id: &str) -> Result<String> {
    let safe = sanitize_token(id);
    if safe.is_empty() {
        return Err(AppError::Validation(format!("invalid identifier: {id:?}")));
    }
    Ok(safe)
}
