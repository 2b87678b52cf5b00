//! Ordered header block handed to destination resolvers.
//!
//! HTTP/2 requests expose their pseudo headers (`:method`, `:scheme`,
//! `:authority`, `:path`) alongside the regular ones so a resolver can
//! rewrite any of them. The outbound request is rebuilt from the block.

use axum::http::request::Parts;

use crate::net::sniff::UpgradeRequest;

pub const METHOD: &str = ":method";
pub const SCHEME: &str = ":scheme";
pub const AUTHORITY: &str = ":authority";
pub const PATH: &str = ":path";
pub const HOST: &str = "host";

/// Header pairs in arrival order. Names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: Vec<(String, String)>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers of an inbound HTTP/2 stream, pseudo headers first.
    pub fn from_parts(parts: &Parts) -> Self {
        let mut block = Self::new();
        block.set(METHOD, parts.method.as_str());
        if let Some(scheme) = parts.uri.scheme_str() {
            block.set(SCHEME, scheme);
        }
        if let Some(authority) = parts.uri.authority() {
            block.set(AUTHORITY, authority.as_str());
        }
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        block.set(PATH, path);

        for (name, value) in &parts.headers {
            block.append(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }
        block
    }

    /// Headers of a sniffed upgrade request plus its `:method`.
    ///
    /// No `:path` is added, so a literal destination's own path is requested
    /// unless a resolver sets one.
    pub fn from_upgrade(request: &UpgradeRequest) -> Self {
        let mut block = Self::new();
        block.set(METHOD, &request.method);
        for (name, value) in &request.headers {
            block.append(name, value);
        }
        block
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value of `name` with `value`, keeping the first position.
    pub fn set(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.entries.iter().position(|(k, _)| *k == name) {
            Some(index) => {
                self.entries[index].1 = value.to_string();
                let mut seen = false;
                self.entries.retain(|(k, _)| {
                    if *k != name {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.entries.push((name, value.to_string())),
        }
    }

    /// Add a value without touching existing ones.
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_ascii_lowercase(), value.to_string()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Regular headers only.
    pub fn regular(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !k.starts_with(':'))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for HeaderBlock {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut block = Self::new();
        for (k, v) in iter {
            block.append(k.as_ref(), v.as_ref());
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn from_parts_adds_pseudo_headers() {
        let request = Request::builder()
            .method("POST")
            .uri("https://gateway.test:8443/items?page=2")
            .header("content-type", "application/json")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();

        let block = HeaderBlock::from_parts(&parts);
        assert_eq!(block.get(METHOD), Some("POST"));
        assert_eq!(block.get(SCHEME), Some("https"));
        assert_eq!(block.get(AUTHORITY), Some("gateway.test:8443"));
        assert_eq!(block.get(PATH), Some("/items?page=2"));
        assert_eq!(block.get("Content-Type"), Some("application/json"));
        assert_eq!(block.regular().count(), 1);
    }

    #[test]
    fn from_upgrade_has_no_path() {
        let request = UpgradeRequest::parse(
            b"GET /chat HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        )
        .unwrap();

        let block = HeaderBlock::from_upgrade(&request);
        assert_eq!(block.get(METHOD), Some("GET"));
        assert!(!block.contains(PATH));
        assert_eq!(block.get("upgrade"), Some("websocket"));
    }

    #[test]
    fn set_collapses_duplicates_in_place() {
        let mut block: HeaderBlock = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        block.set("A", "9");

        let pairs: Vec<_> = block.iter().collect();
        assert_eq!(pairs, vec![("a", "9"), ("b", "2")]);
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut block: HeaderBlock = [("Host", "x"), ("accept", "*/*")].into_iter().collect();
        block.remove("HOST");
        assert_eq!(block.len(), 1);
        assert!(!block.contains("host"));
    }
}
