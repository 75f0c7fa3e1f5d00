//! Cache manager that routes requests through versioned buckets.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::request::{classify, Request, RequestClass};

use super::storage::BucketStore;
use super::traits::{CachedResponse, Served, StoredResponse};

/// Which routing policy applies to static assets.
///
/// Navigations are always tried on the network first; this toggle only
/// changes the subresource path.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Serve from the bucket when present, only hit the network on a miss
  #[default]
  CacheFirst,
  /// Always try the network, fall back to the bucket on failure
  NetworkFirst,
}

/// Immutable cache configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct CachePolicy {
  /// Base URL the asset manifest is resolved against
  pub origin: Url,
  /// Bucket name prefix
  pub name: String,
  /// Manually bumped version literal; bumping it rolls the bucket over
  pub version: String,
  /// Site-relative paths warmed into the bucket at init
  pub precache: Vec<String>,
  /// Fallback document served when a navigation fails
  pub offline_path: String,
  /// Paths never intercepted or stored
  pub bypass: Vec<String>,
  /// Asset routing policy
  pub strategy: Strategy,
}

impl CachePolicy {
  /// Build the policy from loaded configuration.
  pub fn from_config(config: &crate::config::Config) -> Result<Self> {
    Ok(Self {
      origin: config.origin_url()?,
      name: config.site.name.clone(),
      version: config.site.version.clone(),
      precache: config.precache.clone(),
      offline_path: config.offline_path.clone(),
      bypass: config.bypass.clone(),
      strategy: config.strategy,
    })
  }

  /// Name of the bucket for the current version.
  pub fn bucket_name(&self) -> String {
    format!("{}-v{}", self.name, self.version)
  }

  /// Resolve a site-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.origin, e))
  }
}

/// Version information reported over the message protocol.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
  pub version: String,
  #[serde(rename = "cacheName")]
  pub cache_name: String,
}

/// Outcome of routing one request.
#[derive(Debug, Clone)]
pub enum Handled {
  /// The manager produced a response
  Response(Served),
  /// Outside the manager's scope; the caller fetches it directly
  Declined,
  /// No network and nothing cached; the caller reports the failure
  Unavailable,
}

/// Cache manager owning one versioned bucket at a time.
///
/// Network access is injected per call as a fetcher closure, so the manager
/// itself never talks to the network and tests can route requests against
/// canned responses.
pub struct CacheManager<S: BucketStore> {
  store: Arc<S>,
  policy: CachePolicy,
}

impl<S: BucketStore> CacheManager<S> {
  /// Create a manager over the given store and policy.
  pub fn new(store: S, policy: CachePolicy) -> Self {
    Self {
      store: Arc::new(store),
      policy,
    }
  }

  #[allow(dead_code)]
  pub fn policy(&self) -> &CachePolicy {
    &self.policy
  }

  /// Warm the current bucket from the asset manifest.
  ///
  /// Every manifest path is fetched up front; any fetch error or non-200
  /// status abandons the whole warm-up with no partial bucket. Entries land
  /// in a single atomic batch. Returns the number of warmed entries.
  pub async fn init<F, Fut>(&self, fetch: F) -> Result<usize>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let bucket = self.policy.bucket_name();
    let mut warmed = Vec::with_capacity(self.policy.precache.len());

    for path in &self.policy.precache {
      let url = self.policy.resolve(path)?;
      let response = fetch(url)
        .await
        .map_err(|e| eyre!("Warm-up fetch for {} failed: {}", path, e))?;

      if !response.is_storable() {
        return Err(eyre!(
          "Warm-up fetch for {} returned status {}",
          path,
          response.status
        ));
      }

      warmed.push(response);
    }

    self.store.put_all(&bucket, &warmed)?;
    info!(bucket = %bucket, entries = warmed.len(), "bucket warmed");

    Ok(warmed.len())
  }

  /// Promote the current bucket: delete every other bucket, then make sure
  /// the current one exists. Per-bucket deletion failures are logged and
  /// swallowed; cleanup is best-effort.
  pub fn promote(&self) -> Result<()> {
    let current = self.policy.bucket_name();

    for name in self.store.list_buckets()? {
      if name == current {
        continue;
      }
      match self.store.delete_bucket(&name) {
        Ok(()) => info!(bucket = %name, "deleted stale bucket"),
        Err(e) => warn!(bucket = %name, error = %e, "failed to delete stale bucket"),
      }
    }

    self.store.create_bucket(&current)?;
    Ok(())
  }

  /// Delete every bucket unconditionally.
  pub fn teardown(&self) -> Result<()> {
    for name in self.store.list_buckets()? {
      self.store.delete_bucket(&name)?;
    }
    Ok(())
  }

  /// Route one request.
  ///
  /// All failure handling is silent degradation or fallback content: storage
  /// faults are logged and treated as misses, and cache writes never affect
  /// the returned response.
  pub async fn handle<F, Fut>(&self, request: &Request, fetch: F) -> Handled
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    match classify(request, &self.policy.bypass) {
      RequestClass::Declined(reason) => {
        debug!(url = %request.url, ?reason, "request passed through");
        Handled::Declined
      }
      RequestClass::Navigation => self.handle_navigation(request, fetch).await,
      RequestClass::Asset => match self.policy.strategy {
        Strategy::CacheFirst => self.handle_cache_first(request, fetch).await,
        Strategy::NetworkFirst => self.handle_network_first(request, fetch).await,
      },
    }
  }

  /// Navigations always try the network; the offline page is the fallback.
  async fn handle_navigation<F, Fut>(&self, request: &Request, fetch: F) -> Handled
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    match fetch().await {
      Ok(response) => {
        if response.is_storable() {
          self.store_best_effort(&response);
        }
        Handled::Response(Served::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "navigation fetch failed, serving offline page");
        let offline_url = match self.policy.resolve(&self.policy.offline_path) {
          Ok(url) => url,
          Err(_) => return Handled::Unavailable,
        };
        match self.lookup(offline_url.as_str()) {
          Some(stored) => Handled::Response(Served::offline(stored)),
          None => Handled::Unavailable,
        }
      }
    }
  }

  async fn handle_cache_first<F, Fut>(&self, request: &Request, fetch: F) -> Handled
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let url = request.url.as_str();

    if let Some(stored) = self.lookup(url) {
      return Handled::Response(Served::from_cache(stored));
    }

    match fetch().await {
      Ok(response) => {
        if response.is_storable() {
          self.store_best_effort(&response);
        }
        Handled::Response(Served::from_network(response))
      }
      Err(e) => {
        debug!(url = %url, error = %e, "asset fetch failed");
        // Check once more: a concurrent handler may have stored the entry
        // since the miss above.
        match self.lookup(url) {
          Some(stored) => Handled::Response(Served::offline(stored)),
          None => Handled::Unavailable,
        }
      }
    }
  }

  async fn handle_network_first<F, Fut>(&self, request: &Request, fetch: F) -> Handled
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let url = request.url.as_str();

    match fetch().await {
      Ok(response) => {
        if response.is_storable() {
          self.store_best_effort(&response);
        }
        Handled::Response(Served::from_network(response))
      }
      Err(e) => {
        debug!(url = %url, error = %e, "asset fetch failed, falling back to bucket");
        match self.lookup(url) {
          Some(stored) => Handled::Response(Served::offline(stored)),
          None => Handled::Unavailable,
        }
      }
    }
  }

  /// Current version string and bucket name.
  pub fn version_info(&self) -> VersionInfo {
    VersionInfo {
      version: self.policy.version.clone(),
      cache_name: self.policy.bucket_name(),
    }
  }

  /// Buckets and their entry counts.
  pub fn status(&self) -> Result<Vec<(String, usize)>> {
    let mut rows = Vec::new();
    for name in self.store.list_buckets()? {
      let count = self.store.count(&name)?;
      rows.push((name, count));
    }
    Ok(rows)
  }

  /// Read from the current bucket; storage faults are logged and treated as
  /// misses.
  fn lookup(&self, url: &str) -> Option<StoredResponse> {
    match self.store.get(&self.policy.bucket_name(), url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %url, error = %e, "bucket read failed, treating as miss");
        None
      }
    }
  }

  /// Write to the current bucket without letting a failure reach the caller.
  fn store_best_effort(&self, response: &CachedResponse) {
    if let Err(e) = self.store.put(&self.policy.bucket_name(), response) {
      warn!(url = %response.url, error = %e, "bucket write failed, response served anyway");
    }
  }
}

impl<S: BucketStore> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      policy: self.policy.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStore;
  use crate::cache::traits::ServeSource;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn policy(strategy: Strategy) -> CachePolicy {
    CachePolicy {
      origin: Url::parse("https://example.test").unwrap(),
      name: "site".to_string(),
      version: "1.2.0".to_string(),
      precache: vec![
        "/".to_string(),
        "/style.css".to_string(),
        "/offline.html".to_string(),
      ],
      offline_path: "/offline.html".to_string(),
      bypass: vec!["/sw.js".to_string()],
      strategy,
    }
  }

  fn manager(strategy: Strategy) -> CacheManager<MemoryStore> {
    CacheManager::new(MemoryStore::new(), policy(strategy))
  }

  fn response(url: &str, status: u16, body: &[u8]) -> CachedResponse {
    CachedResponse {
      url: url.to_string(),
      status,
      headers: Vec::new(),
      body: body.to_vec(),
    }
  }

  async fn warm(manager: &CacheManager<MemoryStore>) {
    manager
      .init(|url| async move { Ok(response(url.as_str(), 200, b"warmed")) })
      .await
      .unwrap();
  }

  fn served(handled: Handled) -> Served {
    match handled {
      Handled::Response(served) => served,
      other => panic!("expected a response, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_init_warms_every_manifest_path() {
    let manager = manager(Strategy::CacheFirst);
    let warmed = manager
      .init(|url| async move { Ok(response(url.as_str(), 200, b"ok")) })
      .await
      .unwrap();

    assert_eq!(warmed, 3);
    assert_eq!(manager.status().unwrap(), vec![("site-v1.2.0".to_string(), 3)]);
    assert!(manager.lookup("https://example.test/style.css").is_some());
    assert!(manager.lookup("https://example.test/offline.html").is_some());
  }

  #[tokio::test]
  async fn test_init_failure_leaves_no_partial_bucket() {
    let manager = manager(Strategy::CacheFirst);
    let result = manager
      .init(|url| async move {
        if url.path() == "/style.css" {
          Err(eyre!("connection refused"))
        } else {
          Ok(response(url.as_str(), 200, b"ok"))
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(manager.status().unwrap(), Vec::<(String, usize)>::new());
  }

  #[tokio::test]
  async fn test_init_rejects_non_200_manifest_response() {
    let manager = manager(Strategy::CacheFirst);
    let result = manager
      .init(|url| async move {
        let status = if url.path() == "/offline.html" { 404 } else { 200 };
        Ok(response(url.as_str(), status, b"ok"))
      })
      .await;

    assert!(result.is_err());
    assert_eq!(manager.status().unwrap(), Vec::<(String, usize)>::new());
  }

  #[tokio::test]
  async fn test_promote_keeps_only_current_bucket() {
    let store = MemoryStore::new();
    store.put("site-v1.1.0", &response("https://example.test/", 200, b"old")).unwrap();
    store.put("other-v9", &response("https://example.test/", 200, b"other")).unwrap();
    let manager = CacheManager::new(store, policy(Strategy::CacheFirst));

    manager.promote().unwrap();

    assert_eq!(manager.status().unwrap(), vec![("site-v1.2.0".to_string(), 0)]);
  }

  #[tokio::test]
  async fn test_teardown_deletes_every_bucket() {
    let manager = manager(Strategy::CacheFirst);
    warm(&manager).await;
    manager.promote().unwrap();

    manager.teardown().unwrap();

    assert_eq!(manager.status().unwrap(), Vec::<(String, usize)>::new());
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let manager = manager(Strategy::CacheFirst);
    warm(&manager).await;

    let calls = AtomicU32::new(0);
    let req = Request::get(Url::parse("https://example.test/style.css").unwrap());
    let handled = manager
      .handle(&req, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(response("https://example.test/style.css", 200, b"fresh")) }
      })
      .await;

    let served = served(handled);
    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.response.body, b"warmed");
    assert!(served.cached_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_stores() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::get(Url::parse("https://example.test/logo.png").unwrap());
    let handled = manager
      .handle(&req, || async {
        Ok(response("https://example.test/logo.png", 200, b"png"))
      })
      .await;

    assert_eq!(served(handled).source, ServeSource::Network);
    let stored = manager.lookup("https://example.test/logo.png").unwrap();
    assert_eq!(stored.response.body, b"png");
  }

  #[tokio::test]
  async fn test_cache_first_total_failure_is_unavailable() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::get(Url::parse("https://example.test/logo.png").unwrap());
    let handled = manager
      .handle(&req, || async { Err(eyre!("connection refused")) })
      .await;

    assert!(matches!(handled, Handled::Unavailable));
  }

  #[tokio::test]
  async fn test_cache_first_failure_rechecks_bucket() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::get(Url::parse("https://example.test/logo.png").unwrap());
    let handled = manager
      .handle(&req, || {
        // A concurrent handler stores the entry while this fetch fails
        manager
          .store
          .put(
            "site-v1.2.0",
            &response("https://example.test/logo.png", 200, b"raced"),
          )
          .unwrap();
        async { Err(eyre!("connection refused")) }
      })
      .await;

    let served = served(handled);
    assert_eq!(served.source, ServeSource::Offline);
    assert_eq!(served.response.body, b"raced");
  }

  #[tokio::test]
  async fn test_network_first_prefers_network() {
    let manager = manager(Strategy::NetworkFirst);
    warm(&manager).await;

    let req = Request::get(Url::parse("https://example.test/style.css").unwrap());
    let handled = manager
      .handle(&req, || async {
        Ok(response("https://example.test/style.css", 200, b"fresh"))
      })
      .await;

    let served = served(handled);
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body, b"fresh");
    // The fresh copy replaced the warmed one
    let stored = manager.lookup("https://example.test/style.css").unwrap();
    assert_eq!(stored.response.body, b"fresh");
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_bucket() {
    let manager = manager(Strategy::NetworkFirst);
    warm(&manager).await;

    let req = Request::get(Url::parse("https://example.test/style.css").unwrap());
    let handled = manager
      .handle(&req, || async { Err(eyre!("connection refused")) })
      .await;

    let served = served(handled);
    assert_eq!(served.source, ServeSource::Offline);
    assert_eq!(served.response.body, b"warmed");
  }

  #[tokio::test]
  async fn test_navigation_success_is_stored_and_returned() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::navigation(Url::parse("https://example.test/about").unwrap());
    let handled = manager
      .handle(&req, || async {
        Ok(response("https://example.test/about", 200, b"<html>about</html>"))
      })
      .await;

    assert_eq!(served(handled).source, ServeSource::Network);
    assert!(manager.lookup("https://example.test/about").is_some());
  }

  #[tokio::test]
  async fn test_navigation_failure_serves_offline_page() {
    let manager = manager(Strategy::CacheFirst);
    warm(&manager).await;

    let req = Request::navigation(Url::parse("https://example.test/about").unwrap());
    let handled = manager
      .handle(&req, || async { Err(eyre!("connection refused")) })
      .await;

    let served = served(handled);
    assert_eq!(served.source, ServeSource::Offline);
    assert_eq!(served.response.url, "https://example.test/offline.html");
    assert_eq!(served.response.body, b"warmed");
  }

  #[tokio::test]
  async fn test_navigation_failure_without_offline_page_is_unavailable() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::navigation(Url::parse("https://example.test/about").unwrap());
    let handled = manager
      .handle(&req, || async { Err(eyre!("connection refused")) })
      .await;

    assert!(matches!(handled, Handled::Unavailable));
  }

  #[tokio::test]
  async fn test_non_200_response_is_served_but_not_stored() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::get(Url::parse("https://example.test/missing.png").unwrap());
    let handled = manager
      .handle(&req, || async {
        Ok(response("https://example.test/missing.png", 404, b"not found"))
      })
      .await;

    assert_eq!(served(handled).response.status, 404);
    assert!(manager.lookup("https://example.test/missing.png").is_none());
  }

  #[tokio::test]
  async fn test_non_get_is_declined_and_never_stored() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::get(Url::parse("https://example.test/api/contact").unwrap())
      .with_method("POST");
    let handled = manager
      .handle(&req, || async {
        Ok(response("https://example.test/api/contact", 200, b"sent"))
      })
      .await;

    assert!(matches!(handled, Handled::Declined));
    assert!(manager.lookup("https://example.test/api/contact").is_none());
  }

  #[tokio::test]
  async fn test_bypass_path_is_declined() {
    let manager = manager(Strategy::CacheFirst);
    manager.promote().unwrap();

    let req = Request::get(Url::parse("https://example.test/sw.js").unwrap());
    let handled = manager
      .handle(&req, || async {
        Ok(response("https://example.test/sw.js", 200, b"worker"))
      })
      .await;

    assert!(matches!(handled, Handled::Declined));
    assert!(manager.lookup("https://example.test/sw.js").is_none());
  }

  #[tokio::test]
  async fn test_version_info_reports_bucket_name() {
    let manager = manager(Strategy::CacheFirst);
    let info = manager.version_info();
    assert_eq!(info.version, "1.2.0");
    assert_eq!(info.cache_name, "site-v1.2.0");

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["version"], "1.2.0");
    assert_eq!(json["cacheName"], "site-v1.2.0");
  }
}
