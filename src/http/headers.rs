//! Header fields for both directions of an exchange.

use bytes::{BufMut, BytesMut};

/// Header fields in arrival (or insertion) order.
///
/// Field names are matched without regard to ASCII case and may repeat, as
/// on the wire.
///
/// # Examples
///
/// ```
/// use evbridge::http::Headers;
///
/// let mut fields = Headers::new();
/// fields.insert("Accept", "text/plain");
/// fields.insert("Accept", "application/json");
/// fields.set("Host", "example.com");
///
/// assert_eq!(fields.get("host"), Some("example.com"));
/// assert_eq!(fields.get_all("ACCEPT").count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, keeping earlier fields of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field called `name` with one field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of the fields called `name`, in order.
    pub fn get_all<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.fields
            .iter()
            .filter(move |(field, _)| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Drops every field called `name`. `true` if there was one.
    pub fn remove(&mut self, name: &str) -> bool {
        let count = self.fields.len();
        self.fields.retain(|(field, _)| !same_name(field, name));
        self.fields.len() != count
    }

    /// Whether at least one field is called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// `true` when a comma-separated `name` field lists `token`, e.g.
    /// `Connection: keep-alive, Upgrade`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| same_name(item.trim(), token))
    }

    /// Number of fields, counting repeats.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Appends `Name: value\r\n` for every field.
    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        for (name, value) in &self.fields {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
    }

    /// Copies the fields httparse found. Values that are not UTF-8 are skipped.
    pub(crate) fn from_parsed(parsed: &[httparse::Header<'_>]) -> Self {
        let fields = parsed
            .iter()
            .filter_map(|header| {
                let value = std::str::from_utf8(header.value).ok()?;
                Some((header.name.to_owned(), value.to_owned()))
            })
            .collect();
        Self { fields }
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_in_any_case() {
        let mut fields = Headers::new();
        fields.insert("Content-Type", "text/plain");
        assert_eq!(fields.get("content-type"), Some("text/plain"));
        assert!(fields.contains("CONTENT-TYPE"));
        assert_eq!(fields.get("content-length"), None);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut fields = Headers::new();
        fields.insert("X-Tag", "a");
        fields.insert("x-tag", "b");
        fields.set("X-Tag", "c");
        assert_eq!(fields.get_all("x-tag").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn value_outlives_the_name_it_was_looked_up_by() {
        let mut fields = Headers::new();
        fields.insert("Content-Type", "text/plain");
        let value = {
            let name = String::from("content-type");
            fields.get(&name)
        };
        assert_eq!(value, Some("text/plain"));

        let values: Vec<&str> = {
            let name = String::from("CONTENT-TYPE");
            fields.get_all(&name).collect()
        };
        assert_eq!(values, vec!["text/plain"]);
    }

    #[test]
    fn token_lists() {
        let mut fields = Headers::new();
        fields.insert("Transfer-Encoding", "gzip, Chunked");
        assert!(fields.has_token("transfer-encoding", "chunked"));
        assert!(!fields.has_token("transfer-encoding", "identity"));
        assert!(!fields.has_token("connection", "close"));
    }

    #[test]
    fn remove_reports_presence() {
        let mut fields = Headers::new();
        fields.insert("Upgrade", "websocket");
        assert!(fields.remove("upgrade"));
        assert!(fields.is_empty());
        assert!(!fields.remove("upgrade"));
    }

    #[test]
    fn writes_wire_format() {
        let mut fields = Headers::new();
        fields.insert("Host", "example.com");
        fields.insert("Accept", "*/*");
        let mut buf = BytesMut::new();
        fields.write_to(&mut buf);
        assert_eq!(&buf[..], b"Host: example.com\r\nAccept: */*\r\n");
    }
}
