use crate::error::{AppError, Result};
use crate::model::IngestEvent;
use serde_json::Value;

/// One line of a parsed ingest body, either a successfully decoded event or
/// the reason it could not be decoded.
pub enum ParsedLine {
    Event { raw: String, event: IngestEvent },
    ParseError(String),
}

/// Accepts a JSON array of events, a newline-delimited sequence of events, or
/// a single event object. Returns an error only when the body as a whole is
/// empty or cannot be interpreted as any of the three shapes; per-event
/// parse failures become `ParsedLine::ParseError` entries instead.
pub fn parse_body(body: &[u8]) -> Result<Vec<ParsedLine>> {
    let text = std::str::from_utf8(body).map_err(|e| AppError::Validation(format!("body is not valid utf-8: {e}")))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("empty request body".to_string()));
    }

    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)
            .map_err(|e| AppError::Validation(format!("invalid JSON array body: {e}")))?;
        return Ok(values.into_iter().map(parse_value).collect());
    }

    let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > 1 {
        return Ok(lines.into_iter().map(|line| parse_value_str(line)).collect());
    }

    Ok(vec![parse_value_str(trimmed)])
}

fn parse_value_str(line: &str) -> ParsedLine {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => parse_value(value),
        Err(e) => ParsedLine::ParseError(format!("invalid JSON: {e}")),
    }
}

fn parse_value(value: Value) -> ParsedLine {
    let raw = value.to_string();
    match serde_json::from_value::<IngestEvent>(value) {
        Ok(event) => ParsedLine::Event { raw, event },
        Err(e) => ParsedLine::ParseError(format!("event does not match schema: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_body() {
        let body = b"{\"correlationId\":\"a\",\"event\":\"start\"}\n{\"correlationId\":\"b\",\"event\":\"end\"}\n";
        let lines = parse_body(body).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0], ParsedLine::Event { .. }));
    }

    #[test]
    fn test_parse_json_array_body() {
        let body = b"[{\"correlationId\":\"a\"},{\"correlationId\":\"b\"}]";
        let lines = parse_body(body).unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_parse_single_object_body() {
        let body = b"{\"correlationId\":\"a\"}";
        let lines = parse_body(body).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_parse_empty_body_is_error() {
        assert!(parse_body(b"   ").is_err());
    }

    #[test]
    fn test_parse_malformed_line_is_reported_not_fatal() {
        let body = b"{\"correlationId\":\"a\"}\nnot json\n";
        let lines = parse_body(body).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[1], ParsedLine::ParseError(_)));
    }
}
