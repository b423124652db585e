//! An ordered, case-insensitive header multimap.
//!
//! [`Headers`] is independent of any HTTP library. Conversion to and from
//! [`http::HeaderMap`] happens only at the engine boundary.

use http::{HeaderMap, HeaderName, HeaderValue};

/// Ordered header multimap with case-insensitive lookup.
///
/// [`insert`](Headers::insert) replaces every existing value for the name
/// (last write wins); [`append`](Headers::append) keeps them.
///
/// # Examples
///
/// ```
/// use gridwire::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/plain");
/// headers.insert("content-type", "application/json");
///
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, removing any previous values for `name`.
    ///
    /// The entry keeps the position of the first previous occurrence so
    /// overriding a header does not reorder the map.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => {
                self.entries[index] = (name.clone(), value);
                let mut seen = false;
                self.entries.retain(|(existing, _)| {
                    if !existing.eq_ignore_ascii_case(&name) {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Adds a value for `name` without removing existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns every value for `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if at least one value is present for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes every value for `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies every entry of `other` with [`insert`](Headers::insert)
    /// semantics, so `other` wins on conflicting names.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    /// Converts into an [`http::HeaderMap`].
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending header if a name or value is not
    /// valid on the wire.
    pub fn to_header_map(&self) -> Result<HeaderMap, crate::Error> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let header_name = HeaderName::try_from(name.as_str()).map_err(|e| {
                crate::Error::Configuration(format!("Invalid header name {:?}: {}", name, e))
            })?;
            let header_value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                crate::Error::Configuration(format!("Invalid value for header {}: {}", name, e))
            })?;
            map.append(header_name, header_value);
        }
        Ok(map)
    }

    /// Builds from an [`http::HeaderMap`], keeping every value.
    ///
    /// Values that are not visible ASCII are decoded lossily rather than
    /// dropped.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let entries = map
            .iter()
            .map(|(name, value)| {
                let value = match value.to_str() {
                    Ok(text) => text.to_string(),
                    Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
                };
                (name.as_str().to_string(), value)
            })
            .collect();
        Self { entries }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_all_previous_values() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/plain");
        headers.insert("X-Trace", "1");
        headers.append("accept", "text/html");
        headers.insert("ACCEPT", "application/json");

        assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["application/json"]);
        // keeps the position of the first occurrence
        assert_eq!(headers.iter().next(), Some(("ACCEPT", "application/json")));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_append_keeps_values_in_order() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");

        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
        assert_eq!(headers.get_all("Set-Cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_merge_lets_other_win() {
        let mut defaults: Headers = [("Authorization", "Bearer a"), ("User-Agent", "x")]
            .into_iter()
            .collect();
        let request: Headers = [("authorization", "Bearer b")].into_iter().collect();
        defaults.merge(&request);

        assert_eq!(defaults.get("Authorization"), Some("Bearer b"));
        assert_eq!(defaults.get("user-agent"), Some("x"));
    }

    #[test]
    fn test_header_map_conversion() {
        let mut headers = Headers::new();
        headers.append("X-Multi", "1");
        headers.append("X-Multi", "2");
        headers.insert("Content-Type", "application/json");

        let map = headers.to_header_map().unwrap();
        assert_eq!(map.get_all("x-multi").iter().count(), 2);

        let back = Headers::from_header_map(&map);
        assert_eq!(back.get("content-type"), Some("application/json"));
        assert_eq!(back.get_all("x-multi").count(), 2);
    }

    #[test]
    fn test_invalid_header_name_is_configuration_error() {
        let mut headers = Headers::new();
        headers.insert("bad header", "value");

        assert!(matches!(
            headers.to_header_map(),
            Err(crate::Error::Configuration(_))
        ));
    }
}
