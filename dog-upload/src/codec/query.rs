use reqwest::Url;
use serde_json::{Map, Value};

/// Encode a field map as a query string.
///
/// Nested objects become `key[sub]=…`, arrays `key[0]=…`; `null` values are
/// skipped. Keys are emitted in map order.
pub fn encode_fields(map: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in map {
        push_value(&mut pairs, key.clone(), value);
    }
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(&k), urlencoding::encode(&v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn push_value(pairs: &mut Vec<(String, String)>, key: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => pairs.push((key, s.clone())),
        Value::Bool(b) => pairs.push((key, b.to_string())),
        Value::Number(n) => pairs.push((key, n.to_string())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                push_value(pairs, format!("{}[{}]", key, i), item);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                push_value(pairs, format!("{}[{}]", key, sub), item);
            }
        }
    }
}

/// Split a query string into decoded key/value pairs.
///
/// A missing `=` yields an empty value; undecodable escapes are kept raw.
pub fn decode_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Append `query` to the URL's existing query, joining with `&`
pub fn append_query(url: &mut Url, query: &str) {
    if query.is_empty() {
        return;
    }
    let joined = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
        _ => query.to_string(),
    };
    url.set_query(Some(&joined));
}
