//! Ordered, multi-valued query parameters.

use std::fmt::Display;

/// Query parameters for registry calls.
///
/// Keys may repeat and keep insertion order. Values are percent-encoded when
/// rendered; keys are expected to be plain ASCII names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParameters {
    params: Vec<(String, String)>,
}

impl RequestParameters {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Add `value` only when present.
    #[must_use]
    pub fn set_opt(self, key: impl Into<String>, value: Option<impl Display>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Add one entry per value under the same key.
    #[must_use]
    pub fn set_all<V: Display>(self, key: &str, values: impl IntoIterator<Item = V>) -> Self {
        values
            .into_iter()
            .fold(self, |params, value| params.set(key, value))
    }

    /// Append every entry of `other`.
    #[must_use]
    pub fn merge(mut self, other: &RequestParameters) -> Self {
        self.params.extend(other.params.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_query_string(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Append the query string to `url`; the url itself is left untouched.
    pub fn append_to(&self, url: &str) -> String {
        if self.params.is_empty() {
            return url.to_string();
        }
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}{}", self.to_query_string())
    }
}
