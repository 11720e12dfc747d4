//! Path-precedence lookups over loosely typed JSON documents.
//!
//! A field is described by an ordered list of candidate paths; the first path that
//! resolves to a non-null value wins. Coercions are lenient because the upstream
//! API has changed types between versions (numbers as strings, localized
//! `{ "default": "..." }` objects in place of plain strings).

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// One candidate location, as a list of object keys.
pub type Path = &'static [&'static str];

/// Ordered candidate paths for one internal field, newest API name first.
pub type Candidates = &'static [Path];

/// Resolve a single path. `null` counts as absent.
pub fn lookup<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = doc;
    for key in path {
        cur = cur.as_object()?.get(*key)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// First present value across `candidates`, searching each document in turn.
pub fn first_present<'a>(docs: &[&'a Value], candidates: Candidates) -> Option<&'a Value> {
    docs.iter()
        .find_map(|doc| candidates.iter().find_map(|path| lookup(*doc, path)))
}

/// First candidate that coerces with `coerce`; a present value of the wrong shape
/// does not stop the search.
fn first_coerced<T>(
    docs: &[&Value],
    candidates: Candidates,
    coerce: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    docs.iter().find_map(|doc| {
        candidates
            .iter()
            .find_map(|path| lookup(*doc, path).and_then(&coerce))
    })
}

pub fn value_as_i64(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        if f.fract() == 0.0 {
            return Some(f as i64);
        }
    }
    v.as_str().and_then(|s| s.trim().parse::<i64>().ok())
}

pub fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("default").and_then(value_as_string),
        _ => None,
    }
}

pub fn value_as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "y" | "yes" => Some(true),
            "false" | "0" | "n" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn int_field(docs: &[&Value], candidates: Candidates) -> Option<i64> {
    first_coerced(docs, candidates, value_as_i64)
}

pub fn int_or(docs: &[&Value], candidates: Candidates, default: i64) -> i64 {
    int_field(docs, candidates).unwrap_or(default)
}

pub fn text_field(docs: &[&Value], candidates: Candidates) -> Option<String> {
    first_coerced(docs, candidates, value_as_string)
}

pub fn text_or(docs: &[&Value], candidates: Candidates, default: &str) -> String {
    text_field(docs, candidates).unwrap_or_else(|| default.to_string())
}

pub fn bool_or(docs: &[&Value], candidates: Candidates, default: bool) -> bool {
    first_coerced(docs, candidates, value_as_bool).unwrap_or(default)
}

pub fn date_field(docs: &[&Value], candidates: Candidates) -> Option<NaiveDate> {
    first_coerced(docs, candidates, |v| {
        let s = v.as_str()?.trim();
        let day = s.get(..10).unwrap_or(s);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    })
}

pub fn datetime_field(docs: &[&Value], candidates: Candidates) -> Option<DateTime<Utc>> {
    first_coerced(docs, candidates, |v| {
        let s = v.as_str()?.trim();
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Shorten a document for log output.
pub fn preview(doc: &Value, max_len: usize) -> String {
    let mut s = doc.to_string();
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}
