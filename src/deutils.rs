// src/deutils.rs
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub fn default_empty() -> String { String::new() }

/// Lenient string field: absent/null become "", numbers and bools keep their text.
/// The metadata host is not strict about types, a numeric album title must not
/// sink the whole poll.
pub fn deserialize_string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        // arrays/objects carry nothing we can show
        Some(_) => String::new(),
    })
}

/// Header value to owned string, missing or non-ascii -> "".
pub fn header_or_empty(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
