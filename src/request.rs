//! Request model and routing classification.
//!
//! Decides, before any strategy runs, whether a request is one the cache
//! should intervene on at all, and if so whether it is a page navigation or a
//! subresource fetch.

use url::Url;

/// What the request is loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// A full document load
  Navigate,
  /// A subresource (stylesheet, script, image, ...)
  Asset,
}

/// A resource request to be routed through the cache.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: String,
  pub mode: RequestMode,
}

impl Request {
  /// A GET request for a subresource.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: "GET".to_string(),
      mode: RequestMode::Asset,
    }
  }

  /// A GET request for a full document.
  pub fn navigation(url: Url) -> Self {
    Self {
      url,
      method: "GET".to_string(),
      mode: RequestMode::Navigate,
    }
  }

  /// Override the HTTP method.
  #[allow(dead_code)]
  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }
}

/// Why a request was left to the caller's default handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
  /// Not an http/https URL (extension schemes, data URLs, ...)
  UnsupportedScheme,
  /// Hostname is neither a loopback name nor a dotted domain
  InvalidHost,
  /// Only read-only requests are routed
  NonGet,
  /// Path is on the bypass list (e.g. the worker script itself)
  Bypass,
}

/// Routing decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Do not intervene; the caller fetches it directly
  Declined(DeclineReason),
  /// Page navigation: network first, offline page on failure
  Navigation,
  /// Static asset: handled per the configured strategy
  Asset,
}

/// Classify a request against the bypass list.
pub fn classify(request: &Request, bypass: &[String]) -> RequestClass {
  if !matches!(request.url.scheme(), "http" | "https") {
    return RequestClass::Declined(DeclineReason::UnsupportedScheme);
  }

  if !valid_host(&request.url) {
    return RequestClass::Declined(DeclineReason::InvalidHost);
  }

  if request.method != "GET" {
    return RequestClass::Declined(DeclineReason::NonGet);
  }

  if bypass.iter().any(|p| p == request.url.path()) {
    return RequestClass::Declined(DeclineReason::Bypass);
  }

  match request.mode {
    RequestMode::Navigate => RequestClass::Navigation,
    RequestMode::Asset => RequestClass::Asset,
  }
}

/// Accept loopback hosts and anything with a dot; reject bare single-label
/// hostnames, which in practice are local dev aliases we should not cache.
fn valid_host(url: &Url) -> bool {
  match url.host_str() {
    Some(host) => host == "localhost" || host == "127.0.0.1" || host.contains('.'),
    None => false,
  }
}
