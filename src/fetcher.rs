//! Out-of-page network fetches used to fill the asset cache.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ArchiverError, Result};

/// A response fetched on behalf of an intercepted request.
#[derive(Clone, Debug)]
pub struct FetchedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared `content-length`, or the body length when the header is
    /// missing or malformed.
    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(self.body.len())
    }
}

/// Performs the network leg of fetch-then-cache.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<FetchedResponse>;
}

/// Outbound proxy shared by the browser launch and the fetcher.
#[derive(Clone, Debug, Default)]
pub struct ProxyConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// [`AssetFetcher`] backed by a `reqwest` client.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("post-archiver/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = proxy {
            let mut p = reqwest::Proxy::all(&proxy.server)
                .map_err(|e| ArchiverError::Config(format!("invalid proxy {}: {e}", proxy.server)))?;
            if let Some(user) = &proxy.username {
                p = p.basic_auth(user, proxy.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(p);
        }
        let client = builder
            .build()
            .map_err(|e| ArchiverError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<FetchedResponse> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ArchiverError::Network(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ArchiverError::Network(format!("{url}: {e}")))?
            .to_vec();

        Ok(FetchedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: Vec<(&str, &str)>, body_len: usize) -> FetchedResponse {
        FetchedResponse {
            status: 200,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: vec![0; body_len],
        }
    }

    #[test]
    fn content_length_prefers_header() {
        let r = response(vec![("Content-Length", "20971520")], 3);
        assert_eq!(r.content_length(), 20 * 1024 * 1024);
    }

    #[test]
    fn content_length_falls_back_to_body() {
        assert_eq!(response(vec![], 7).content_length(), 7);
        assert_eq!(response(vec![("content-length", "junk")], 5).content_length(), 5);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let r = response(vec![("Content-Type", "image/png")], 0);
        assert_eq!(r.header("content-type"), Some("image/png"));
        assert_eq!(r.header("etag"), None);
    }
}
