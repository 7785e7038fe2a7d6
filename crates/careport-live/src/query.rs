//! Query string handling for live views.
//!
//! A page's query string carries everything the server needs to reproduce the
//! current view (filters, sort keys, the page number). Live views read it once
//! at bind time and merge their own page number into it on every request.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::form_urlencoded;
use url::Url;

/// Mapping of query keys to their values, in first-insertion order.
#[derive(Debug, Clone, Default, Eq)]
pub struct Query {
    entries: Vec<(String, Vec<String>)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw query string (with or without the leading `?`).
    ///
    /// Parts that do not split into exactly one key and one value, or whose
    /// key is empty, are dropped. `+` is read as an encoded space.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut query = Query::new();
        for part in raw.split('&') {
            let mut fields = part.split('=');
            let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            query.push(decode_component(key), decode_component(value));
        }
        query
    }

    pub fn from_url(url: &Url) -> Self {
        url.query().map(Self::parse).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Appends `value` to the list bound to `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Binds `key` to exactly `values`, replacing whatever was there.
    pub fn set(&mut self, key: impl Into<String>, values: Vec<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((key, values)),
        }
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_first<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_all(key)
            .first()
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    /// Returns a new query with every key of `self` that `overrides` does not
    /// mention, followed by every key of `overrides`.
    pub fn merge(&self, overrides: &Query) -> Query {
        let mut merged = Query::new();
        for (key, values) in &self.entries {
            if !overrides.contains_key(key) {
                merged.set(key.clone(), values.clone());
            }
        }
        for (key, values) in &overrides.entries {
            merged.set(key.clone(), values.clone());
        }
        merged
    }

    /// Form-urlencoded representation, one `key=value` pair per value.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.entries {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }

    /// Copy of `url` whose query component is this query.
    pub fn apply_to(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if self.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&self.encode()));
        }
        url
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(key, values)| other.get_all(key) == values.as_slice())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Builds a query of single-valued keys, e.g. `{page: 3}`.
impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (key, value) in iter {
            query.set(key, vec![value.to_string()]);
        }
        query
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_keys_in_order() {
        let query = Query::parse("?expr=host%3Aioc*&sort=-seenLast&sort=port&page=2");
        assert_eq!(query.get_all("sort"), ["-seenLast", "port"]);
        assert_eq!(query.get_first("expr", ""), "host:ioc*");
        assert_eq!(query.get_first("page", "1"), "2");
        assert_eq!(query.keys().collect::<Vec<_>>(), ["expr", "sort", "page"]);
    }

    #[test]
    fn drops_malformed_parts() {
        let query = Query::parse("novalue&=orphan&a=b=c&ok=1&&");
        assert_eq!(query.len(), 1);
        assert_eq!(query.get_first("ok", ""), "1");
        assert!(!query.contains_key("novalue"));
        assert!(!query.contains_key("a"));
    }

    #[test]
    fn plus_is_space_before_decoding() {
        let query = Query::parse("expr=pv+name%2Bplus");
        assert_eq!(query.get_first("expr", ""), "pv name+plus");
    }

    #[test]
    fn empty_value_is_kept() {
        let query = Query::parse("expr=");
        assert_eq!(query.get_all("expr"), [""]);
    }

    #[test]
    fn get_first_falls_back_to_default() {
        let query = Query::parse("");
        assert!(query.is_empty());
        assert_eq!(query.get_first("page", "1"), "1");
    }

    #[test]
    fn merge_keeps_unrelated_parameters() {
        let current = Query::parse("expr=ioc*&page=4&sort=-port&sort=host");
        let merged = current.merge(&Query::from_iter([("page", 5)]));
        assert_eq!(merged.get_all("page"), ["5"]);
        assert_eq!(merged.get_all("sort"), ["-port", "host"]);
        assert_eq!(merged.get_first("expr", ""), "ioc*");
        assert_eq!(merged.keys().last(), Some("page"));
        // the source query is untouched
        assert_eq!(current.get_first("page", ""), "4");
    }

    #[test]
    fn encode_then_parse_is_stable() {
        for raw in [
            "a=1&b=2&a=3",
            "expr=host%3Aioc%20one&page=7",
            "q=%E2%9C%93&empty=",
            "k+ey=v%26al",
        ] {
            let once = Query::parse(raw);
            let twice = Query::parse(&once.encode());
            assert_eq!(once, twice, "round trip of {raw}");
            assert_eq!(Query::parse(&twice.encode()), twice);
        }
    }

    #[test]
    fn equality_ignores_key_order() {
        assert_eq!(Query::parse("a=1&b=2"), Query::parse("b=2&a=1"));
        assert_ne!(Query::parse("a=1&a=2"), Query::parse("a=2&a=1"));
    }

    #[test]
    fn apply_to_replaces_url_query() {
        let url = Url::parse("http://caobserver.example/beacons/?old=1").unwrap();
        let query = Query::from_iter([("page", 2)]);
        assert_eq!(
            query.apply_to(&url).as_str(),
            "http://caobserver.example/beacons/?page=2"
        );
        assert_eq!(
            Query::new().apply_to(&url).as_str(),
            "http://caobserver.example/beacons/"
        );
    }
}
