//! `OpenAPI` query-parameter serialization (`style`, `explode`, `allowReserved`, `allowEmptyValue`).

use openapiv3::QueryStyle;
use serde_json::{Map, Value};
use std::fmt::Write as _;

/// How a query parameter's value is written into the URL.
#[derive(Debug, Clone)]
pub(crate) struct QuerySerialization {
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
}

impl QuerySerialization {
    /// `explode` defaults to `true` only for `form` and `deepObject`.
    pub fn new(
        style: QueryStyle,
        explode: Option<bool>,
        allow_reserved: bool,
        allow_empty_value: bool,
    ) -> Self {
        let explode =
            explode.unwrap_or(matches!(style, QueryStyle::Form | QueryStyle::DeepObject));
        Self {
            style,
            explode,
            allow_reserved,
            allow_empty_value,
        }
    }
}

impl Default for QuerySerialization {
    fn default() -> Self {
        Self::new(QueryStyle::Form, None, false, false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryPair {
    pub key: String,
    pub value: String,
    pub allow_reserved: bool,
}

/// Serialize one argument into zero or more `key=value` pairs.
pub(crate) fn serialize_param(
    name: &str,
    value: &Value,
    required: bool,
    ser: &QuerySerialization,
) -> Vec<QueryPair> {
    let pair = |key: String, value: String| QueryPair {
        key,
        value,
        allow_reserved: ser.allow_reserved,
    };

    if is_empty(value) {
        // Optional empty values are dropped unless the parameter explicitly allows them.
        return if required || ser.allow_empty_value {
            vec![pair(name.to_string(), String::new())]
        } else {
            Vec::new()
        };
    }

    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(value_to_string).collect();
            match (&ser.style, ser.explode) {
                (QueryStyle::Form, true) => items
                    .into_iter()
                    .map(|v| pair(name.to_string(), v))
                    .collect(),
                (QueryStyle::SpaceDelimited, _) => vec![pair(name.to_string(), items.join(" "))],
                (QueryStyle::PipeDelimited, _) => vec![pair(name.to_string(), items.join("|"))],
                (QueryStyle::Form | QueryStyle::DeepObject, _) => {
                    vec![pair(name.to_string(), items.join(","))]
                }
            }
        }
        Value::Object(map) => match (&ser.style, ser.explode) {
            (QueryStyle::DeepObject, _) => map
                .iter()
                .map(|(k, v)| pair(format!("{name}[{k}]"), value_to_string(v)))
                .collect(),
            (QueryStyle::Form, true) => map
                .iter()
                .map(|(k, v)| pair(k.clone(), value_to_string(v)))
                .collect(),
            (QueryStyle::Form, false) => vec![pair(name.to_string(), flatten_object(map, ","))],
            (QueryStyle::SpaceDelimited, _) => vec![pair(name.to_string(), flatten_object(map, " "))],
            (QueryStyle::PipeDelimited, _) => vec![pair(name.to_string(), flatten_object(map, "|"))],
        },
        scalar => vec![pair(name.to_string(), value_to_string(scalar))],
    }
}

fn flatten_object(map: &Map<String, Value>, delimiter: &str) -> String {
    map.iter()
        .flat_map(|(k, v)| [k.clone(), value_to_string(v)])
        .collect::<Vec<_>>()
        .join(delimiter)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Join pairs into a query string, percent-encoding keys and values.
pub(crate) fn encode_query(pairs: &[QueryPair]) -> String {
    pairs
        .iter()
        .map(|p| {
            format!(
                "{}={}",
                percent_encode(&p.key, false),
                percent_encode(&p.value, p.allow_reserved)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 percent-encoding.
///
/// Unreserved characters are always kept. With `allow_reserved`, reserved characters are kept too,
/// except `&`, `=` and `#` which would break the pair structure of the query string.
pub(crate) fn percent_encode(s: &str, allow_reserved: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        let unreserved = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~');
        let reserved_ok = allow_reserved && b":/?[]@!$'()*+,;".contains(&b);
        if unreserved || reserved_ok {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

/// Render a JSON value for a URL path segment, query value or header.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
