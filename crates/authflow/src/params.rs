//! Ordered request parameter map with form encoding
//!
//! OAuth token requests and authorize URLs are built from an ordered
//! key→value mapping. Repeated occurrences of the same key (e.g. the
//! `resource` parameter of RFC 8707) are held internally as one value with
//! the occurrences joined by `\n`, and expanded back into repeated
//! `key=value` pairs when serialized to the wire.

use std::borrow::Cow;

/// Ordered key→value parameter mapping with multi-value support.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams(Vec<(String, String)>);

impl RequestParams {
    /// Create an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Append an additional value for `key`, newline-joining it onto any
    /// existing value. Used for parameters that repeat on the wire.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => {
                entry.1.push('\n');
                entry.1.push_str(&value);
            }
            None => self.0.push((key, value)),
        }
    }

    /// Get the (possibly newline-joined) value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Remove and return the value for `key`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    /// Merge `other` into `self`; values from `other` win on key collision.
    pub fn merge(&mut self, other: &Self) {
        for (k, v) in &other.0 {
            self.set(k.clone(), v.clone());
        }
    }

    /// Whether the map holds no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys (multi-values count once).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate pairs in insertion order without expanding multi-values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to a `application/x-www-form-urlencoded` query string.
    ///
    /// Newline-joined multi-values expand into repeated `key=value` pairs in
    /// order. Keys and values are percent-encoded.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.0.len());
        for (key, joined) in &self.0 {
            for value in joined.split('\n') {
                parts.push(format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                ));
            }
        }
        parts.join("&")
    }

    /// Parse a form-encoded query or fragment string.
    ///
    /// Repeated keys are newline-joined in insertion order. `+` is decoded as
    /// a space per form-encoding rules, then percent-escapes are resolved.
    #[must_use]
    pub fn parse_query(query: &str) -> Self {
        let mut params = Self::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (form_decode(k), form_decode(v)),
                None => (form_decode(pair), String::new()),
            };
            params.append(key, value);
        }
        params
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// Decode one form-encoded component: `+` becomes a space, then
/// percent-escapes are resolved. Malformed escapes are left untouched.
fn form_decode(component: &str) -> String {
    let plus_decoded = component.replace('+', " ");
    match urlencoding::decode(&plus_decoded) {
        Ok(Cow::Borrowed(s)) => s.to_owned(),
        Ok(Cow::Owned(s)) => s,
        Err(_) => plus_decoded,
    }
}
