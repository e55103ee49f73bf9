/// Query string parsing
use std::borrow::Cow;

use crate::Params;

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .unwrap_or(spaced)
}

/// Parses `a=1&b=two` into key/value pairs in order of appearance
///
/// Keys without `=` get an empty value. Undecodable escapes are kept as-is.
///
/// ```
/// use tessera_router::query::parse_query;
///
/// let pairs = parse_query("ref=email&q=a%20b&flag");
/// assert_eq!(pairs, vec![
///     ("ref".to_string(), "email".to_string()),
///     ("q".to_string(), "a b".to_string()),
///     ("flag".to_string(), String::new()),
/// ]);
/// ```
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (decode(key), decode(value)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

/// Merges query pairs into `params` without overriding existing keys
///
/// The first occurrence of a repeated query key wins.
pub fn merge_query(params: &mut Params, query: &str) {
    for (key, value) in parse_query(query) {
        params.entry(key).or_insert(value);
    }
}
