use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Proxy, StatusCode};
use thiserror::Error;
use url::Url;

use crate::settings::{ProxyAuth, Settings};

const USER_AGENT: &str = concat!("page-monitor/", env!("CARGO_PKG_VERSION"));

/// Why a page could not be fetched. The monitor skips the target for the
/// cycle whatever the variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("proxy error: {0}")]
    Proxy(String),
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// HTTP(S) GET routed through a SOCKS5 proxy.
pub struct ProxyFetcher {
    client: Client,
}

impl ProxyFetcher {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.proxy,
            settings.proxy_auth.as_ref(),
            settings.request_timeout(),
        )
    }

    pub fn new(proxy: &str, auth: Option<&ProxyAuth>, timeout: Duration) -> Result<Self> {
        let proxy_url = socks_url(proxy, auth)?;
        let client = Client::builder()
            .proxy(Proxy::all(proxy_url).context("invalid SOCKS5 proxy")?)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

/// `socks5h` so that name resolution happens on the proxy side.
fn socks_url(proxy: &str, auth: Option<&ProxyAuth>) -> Result<Url> {
    let mut url = Url::parse(&format!("socks5h://{proxy}"))
        .with_context(|| format!("invalid proxy address '{proxy}'"))?;

    if let Some(auth) = auth {
        url.set_username(&auth.username)
            .map_err(|_| anyhow!("proxy address '{proxy}' cannot carry credentials"))?;
        url.set_password(Some(&auth.password))
            .map_err(|_| anyhow!("proxy address '{proxy}' cannot carry credentials"))?;
    }

    Ok(url)
}

fn ensure_success(status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::Http(status.as_u16()))
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if let Some(status) = err.status() {
        FetchError::Http(status.as_u16())
    } else if err.is_connect() {
        // Every connection goes to the proxy first.
        FetchError::Proxy(format!("{err:#}"))
    } else {
        FetchError::Network(format!("{err:#}"))
    }
}

#[async_trait]
impl PageFetcher for ProxyFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let result = async {
            let response = self.client.get(url).send().await.map_err(classify)?;
            ensure_success(response.status())?;
            response.text().await.map_err(classify)
        }
        .await;

        match &result {
            Ok(body) => debug!("Fetched {} bytes from {url}", body.len()),
            Err(err) => warn!("Request error for {url}: {err}"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_success_status_is_http_error() {
        assert_eq!(ensure_success(StatusCode::OK), Ok(()));
        assert_eq!(
            ensure_success(StatusCode::NOT_FOUND),
            Err(FetchError::Http(404))
        );
        assert_eq!(
            ensure_success(StatusCode::BAD_GATEWAY),
            Err(FetchError::Http(502))
        );
    }

    #[test]
    fn proxy_url_uses_remote_dns() {
        let url = socks_url("127.0.0.1:9050", None).unwrap();
        assert_eq!(url.scheme(), "socks5h");
        assert_eq!(url.port(), Some(9050));
        assert_eq!(url.username(), "");
    }

    #[test]
    fn proxy_credentials_are_percent_encoded() {
        let auth = ProxyAuth {
            username: "monitor".into(),
            password: "p@ss:word".into(),
        };
        let url = socks_url("proxy.internal:1080", Some(&auth)).unwrap();

        assert_eq!(url.username(), "monitor");
        assert_eq!(url.password(), Some("p%40ss%3Aword"));
    }

    #[tokio::test]
    async fn unreachable_proxy_is_reported_not_raised() {
        // Nothing listens on port 1; the connection to the proxy is refused.
        let fetcher = ProxyFetcher::new("127.0.0.1:1", None, Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch("http://example.com/").await.unwrap_err();
        assert!(!matches!(err, FetchError::Http(_)), "unexpected {err:?}");
    }
}
