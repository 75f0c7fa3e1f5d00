use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::CachedResponse;
use crate::request::Request;

/// HTTP client used for warm-up and routed fetches.
///
/// Only GET is ever issued; everything else is declined upstream and handled
/// by the caller's own machinery. No retries and no timeouts beyond reqwest
/// defaults: a fetch either resolves or rejects, and fallback paths trigger
/// only on rejection.
#[derive(Clone)]
pub struct HttpClient {
  http: reqwest::Client,
}

impl HttpClient {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("cachet/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http })
  }

  /// GET a URL and capture status, headers, and body.
  ///
  /// The returned response keeps the *requested* URL even when the transfer
  /// was redirected, so bucket keys stay aligned with later lookups.
  pub async fn fetch_url(&self, url: Url) -> Result<CachedResponse> {
    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Fetch for {} failed: {}", url, e))?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body for {}: {}", url, e))?
      .to_vec();

    Ok(CachedResponse {
      url: url.as_str().to_string(),
      status,
      headers,
      body,
    })
  }

  /// Fetch a routed request.
  pub async fn fetch(&self, request: &Request) -> Result<CachedResponse> {
    self.fetch_url(request.url.clone()).await
  }
}
