use std::collections::HashMap;

/// Content type applied to outgoing responses that do not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Parse a flat raw header sequence into ordered `(name, value)` pairs.
///
/// Even indices are names and odd indices are values. A pair is dropped when
/// its name is empty, when the name is a pseudo-header (starts with `:`), or
/// when the value is missing from an odd-length tail. Names keep their
/// original casing.
///
/// # Example
///
/// ```
/// use smoker::server::parse_headers;
///
/// let raw = vec![":".to_string(), "x".to_string(), "h".to_string(), "v".to_string()];
/// assert_eq!(parse_headers(&raw), vec![("h".to_string(), "v".to_string())]);
/// ```
pub fn parse_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.chunks(2)
        .filter_map(|pair| match pair {
            [name, value] if !name.is_empty() && !name.starts_with(':') => {
                Some((name.clone(), value.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Convert response headers into the map handed to the outgoing sink.
///
/// Every entry is copied as-is. When no `content-type` entry exists (compared
/// ASCII case-insensitively) the default `text/plain; charset=UTF-8` is added.
pub fn to_outgoing_headers<I, K, V>(headers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut out: HashMap<String, String> = headers
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();

    if !out.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        out.insert("content-type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
    }

    out
}
