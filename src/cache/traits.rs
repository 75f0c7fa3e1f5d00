//! Core types for the caching system.

use chrono::{DateTime, Utc};

/// An HTTP response captured for storage: the final status, the headers that
/// survived transport, and the full body.
///
/// The `url` is always the URL that was *requested*, not the URL a redirect
/// chain may have landed on, so bucket keys line up with later lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  /// Whether this response may be written to a bucket.
  ///
  /// Only a plain 200 qualifies; redirects, errors, and opaque responses are
  /// never stored.
  pub fn is_storable(&self) -> bool {
    self.status == 200
  }

  /// Look up a header value by name (case-insensitive).
  #[allow(dead_code)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A bucket hit: the stored response plus when it was written.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub response: CachedResponse,
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh response from the network
  Network,
  /// Response served from the bucket by the cache-first strategy
  Cache,
  /// Network unavailable, serving the bucket's copy (or the offline page)
  Offline,
}

/// The result of routing a request, including metadata about the source.
#[derive(Debug, Clone)]
pub struct Served {
  /// The response to hand back to the caller
  pub response: CachedResponse,
  /// Where it came from
  pub source: ServeSource,
  /// When it was cached (if it came from a bucket)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// A fresh network response.
  pub fn from_network(response: CachedResponse) -> Self {
    Self {
      response,
      source: ServeSource::Network,
      cached_at: None,
    }
  }

  /// A deliberate bucket hit.
  pub fn from_cache(stored: StoredResponse) -> Self {
    Self {
      response: stored.response,
      source: ServeSource::Cache,
      cached_at: Some(stored.cached_at),
    }
  }

  /// A bucket fallback after the network failed.
  pub fn offline(stored: StoredResponse) -> Self {
    Self {
      response: stored.response,
      source: ServeSource::Offline,
      cached_at: Some(stored.cached_at),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(status: u16) -> CachedResponse {
    CachedResponse {
      url: "https://example.test/a.css".to_string(),
      status,
      headers: vec![("Content-Type".to_string(), "text/css".to_string())],
      body: b"body{}".to_vec(),
    }
  }

  #[test]
  fn test_only_status_200_is_storable() {
    assert!(response(200).is_storable());
    assert!(!response(301).is_storable());
    assert!(!response(404).is_storable());
    assert!(!response(500).is_storable());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let r = response(200);
    assert_eq!(r.header("content-type"), Some("text/css"));
    assert_eq!(r.header("CONTENT-TYPE"), Some("text/css"));
    assert_eq!(r.header("etag"), None);
  }
}
