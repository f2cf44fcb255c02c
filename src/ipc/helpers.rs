use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

/// Trimmed, non-empty string param. Missing, non-string, and blank values
/// all read as `None` so handlers can use one required-field check.
pub fn str_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn i64_param(params: &Value, key: &str, default: i64) -> i64 {
    params.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

/// "true"/"false" string flags come straight off form posts; accept a real
/// bool as well.
pub fn flag_param(params: &Value, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

pub fn exists_active(conn: &Connection, table: &str, id: &str) -> rusqlite::Result<bool> {
    // `table` is always one of our own literals, never caller input.
    let sql = format!("SELECT 1 FROM {} WHERE id = ? AND is_deleted = 0", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

/// Sort parameters arrive as free-form strings; only whitelisted names are
/// ever interpolated into a query. Unknown names fall back to the default.
pub fn sort_clause(params: &Value, allowed: &[(&str, &str)], default_col: &str) -> String {
    let sort_by = params.get("sortBy").and_then(|v| v.as_str()).unwrap_or("");
    let col = allowed
        .iter()
        .find(|(name, _)| *name == sort_by)
        .map(|(_, col)| *col)
        .unwrap_or(default_col);
    let dir = match params.get("sortOrder").and_then(|v| v.as_str()) {
        Some("desc") => "DESC",
        _ => "ASC",
    };
    format!("{} {}", col, dir)
}

/// Minimal percent-encoding for the redirect query string (RFC 3986
/// unreserved set passes through).
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
