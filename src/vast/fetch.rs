//! VAST document retrieval: the fetch/parse collaborator boundary and its
//! HTTP implementation, including wrapper-chain resolution.

use crate::error::{AdCueError, Result};
use crate::metrics;
use crate::vast::model::{Ad, CreativeKind, VastResponse};
use crate::vast::parser;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Per-request fetch options, resolved from the plugin configuration
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub with_credentials: bool,
    /// Maximum number of VAST wrapper redirects to follow
    pub wrapper_limit: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            with_credentials: true,
            wrapper_limit: 10,
        }
    }
}

/// Boundary to the VAST fetch/parse collaborator.
///
/// The ad loader only depends on this trait; tests substitute scripted
/// responses without any network.
pub trait VastFetcher: Send + Sync {
    /// Fetch a VAST document from `url`, following wrapper chains, and return
    /// a response containing inline ads only.
    fn fetch(
        &self,
        url: &str,
        opts: &FetchOptions,
    ) -> impl Future<Output = Result<VastResponse>> + Send;

    /// Parse an already-retrieved VAST XML string
    fn parse_document(&self, xml: &str) -> Result<VastResponse> {
        parser::parse_vast(xml)
    }
}

/// reqwest-backed VAST fetcher
#[derive(Clone, Debug)]
pub struct HttpVastFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpVastFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_millis(2000),
        }
    }

    /// Fetch one VAST document with 1 retry and 500ms backoff on failure
    async fn fetch_document(&self, url: &str, opts: &FetchOptions) -> Result<VastResponse> {
        if opts.with_credentials {
            // Cookie/credential forwarding is the embedding application's
            // concern (cookie store on the shared reqwest client).
            debug!("withCredentials is set; relying on the shared client's cookie store");
        }

        let max_attempts = 2;
        let mut last_err: Option<AdCueError> = None;

        for attempt in 1..=max_attempts {
            let response = self
                .client
                .get(url)
                .timeout(self.timeout)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match response {
                Ok(resp) => {
                    let xml = resp.text().await.map_err(AdCueError::from)?;
                    return parser::parse_vast(&xml);
                }
                Err(e) => {
                    warn!(
                        "VAST request to {} failed: {} (attempt {}/{})",
                        url, e, attempt, max_attempts
                    );
                    last_err = Some(e.into());
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AdCueError::VastParse(format!("no response from VAST endpoint {}", url))
        }))
    }
}

impl VastFetcher for HttpVastFetcher {
    fn fetch(
        &self,
        url: &str,
        opts: &FetchOptions,
    ) -> impl Future<Output = Result<VastResponse>> + Send {
        async move {
            let result = self.fetch_resolved(url, opts).await;
            match &result {
                Ok(response) if response.ads.is_empty() => metrics::record_vast_request("empty"),
                Ok(_) => metrics::record_vast_request("success"),
                Err(_) => metrics::record_vast_request("error"),
            }
            result
        }
    }
}

impl HttpVastFetcher {
    /// Fetch and resolve wrapper redirects until only inline ads remain
    async fn fetch_resolved(&self, url: &str, opts: &FetchOptions) -> Result<VastResponse> {
        let mut response = self.fetch_document(url, opts).await?;
        let mut base = url.to_string();
        let mut depth = 0;

        while response.ads.iter().any(Ad::is_wrapper) {
            if depth >= opts.wrapper_limit {
                warn!(
                    "VAST wrapper chain exceeded limit ({}), dropping unresolved wrappers",
                    opts.wrapper_limit
                );
                response.ads.retain(|ad| !ad.is_wrapper());
                break;
            }

            let mut resolved = Vec::new();
            let mut next_base = base.clone();

            for ad in std::mem::take(&mut response.ads) {
                let Some(tag_uri) = ad.ad_tag_uri.clone() else {
                    resolved.push(ad);
                    continue;
                };

                let target = match resolve_tag_uri(&base, &tag_uri) {
                    Some(t) => t,
                    None => {
                        warn!("Invalid VASTAdTagURI {}, dropping wrapper {}", tag_uri, ad.id);
                        continue;
                    }
                };

                match self.fetch_document(&target, opts).await {
                    Ok(child) => {
                        info!(
                            "Resolved wrapper {} into {} ad(s) from {}",
                            ad.id,
                            child.ads.len(),
                            target
                        );
                        next_base = target;
                        for mut child_ad in child.ads {
                            merge_wrapper_trackers(&ad, &mut child_ad);
                            resolved.push(child_ad);
                        }
                    }
                    Err(e) => {
                        warn!("Wrapper redirect {} failed: {}", target, e);
                    }
                }
            }

            response.ads = resolved;
            base = next_base;
            depth += 1;
        }

        Ok(response)
    }
}

/// Resolve a wrapper tag URI, joining relative references against the
/// document that contained them
fn resolve_tag_uri(base: &str, tag_uri: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(tag_uri) {
        return Some(absolute.into());
    }
    Url::parse(base)
        .ok()?
        .join(tag_uri)
        .ok()
        .map(Url::into)
}

/// Fold a wrapper ad's tracking surface into one of the inline ads it
/// resolved to: impressions, error URL fallback, and linear tracking events.
fn merge_wrapper_trackers(wrapper: &Ad, inline: &mut Ad) {
    inline
        .impression_urls
        .extend(wrapper.impression_urls.iter().cloned());

    if inline.error_url.is_none() {
        inline.error_url = wrapper.error_url.clone();
    }

    let wrapper_events: Vec<_> = wrapper
        .creatives
        .iter()
        .filter_map(|c| c.as_linear())
        .flat_map(|l| l.tracking_events.iter().cloned())
        .collect();

    if wrapper_events.is_empty() {
        return;
    }

    for creative in &mut inline.creatives {
        if let CreativeKind::Linear(linear) = &mut creative.kind {
            linear.tracking_events.extend(wrapper_events.iter().cloned());
        }
    }
}
