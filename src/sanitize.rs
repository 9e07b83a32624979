use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static SAFE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:/-]+$").unwrap());

/// Returns `input` unchanged if it is made up entirely of the safe character
/// set used when composing query filters by string interpolation, otherwise
/// an empty string. Callers must omit empty results from their filter list
/// rather than interpolating them.
pub fn sanitize_token(input: &str) -> String {
    if !input.is_empty() && SAFE_TOKEN.is_match(input) {
        input.to_string()
    } else {
        String::new()
    }
}

/// A resolved `[from, to)` query window.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Parses an optional `(from, to)` pair of RFC3339 timestamps, falling back
/// to the last hour when either is missing, unparseable, or `from >= to`.
pub fn resolve_window(from: Option<&str>, to: Option<&str>) -> Window {
    let now = Utc::now();
    let default = Window {
        from: now - Duration::hours(1),
        to: now,
    };

    let parsed_from = from.and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    let parsed_to = to.and_then(|s| DateTime::parse_from_rfc3339(s).ok());

    match (parsed_from, parsed_to) {
        (Some(f), Some(t)) => {
            let f = f.with_timezone(&Utc);
            let t = t.with_timezone(&Utc);
            if f >= t {
                default
            } else {
                Window { from: f, to: t }
            }
        }
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_token_accepts_safe_chars() {
        assert_eq!(sanitize_token("checkout-service"), "checkout-service");
        assert_eq!(sanitize_token("v1.2.3"), "v1.2.3");
        assert_eq!(sanitize_token("2026-07-26T00:00:00Z"), "");
    }

    #[test]
    fn test_sanitize_token_rejects_injection_attempt() {
        assert_eq!(sanitize_token("svc'; DROP TABLE spans; --"), "");
        assert_eq!(sanitize_token(""), "");
    }

    #[test]
    fn test_resolve_window_defaults_on_missing() {
        let w = resolve_window(None, None);
        assert!(w.to > w.from);
    }

    #[test]
    fn test_resolve_window_defaults_on_inverted_range() {
        let w = resolve_window(Some("2026-07-26T12:00:00Z"), Some("2026-07-26T10:00:00Z"));
        assert!(w.to > w.from);
    }

    #[test]
    fn test_resolve_window_honors_valid_range() {
        let w = resolve_window(
            Some("2026-07-26T10:00:00Z"),
            Some("2026-07-26T12:00:00Z"),
        );
        assert_eq!(w.from.to_rfc3339(), "2026-07-26T10:00:00+00:00");
        assert_eq!(w.to.to_rfc3339(), "2026-07-26T12:00:00+00:00");
    }
}
