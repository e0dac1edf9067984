use std::{collections::HashSet, fs, path::Path, time::Duration};

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "data/config.json";
pub const DEFAULT_DB_PATH: &str = "data/page-history.db";

fn default_request_timeout() -> u64 {
    30
}

/// A watched page. The URL is the tracking key; the name is only a label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
}

impl Target {
    pub fn new(name: Option<&str>, url: &str) -> Self {
        Self {
            name: name.map(str::to_string),
            url: url.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub from: String,
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    pub subject: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
}

/// Immutable runtime configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub sites: Vec<Target>,
    /// SOCKS5 endpoint as `host:port`.
    pub proxy: String,
    #[serde(default)]
    pub proxy_auth: Option<ProxyAuth>,
    /// Seconds between cycles.
    pub check_interval: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    pub email: EmailSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        let settings = Self::from_json(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(settings)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(contents).context("Failed to parse configuration JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.sites.is_empty(), "no sites configured");

        let mut seen = HashSet::new();
        for site in &self.sites {
            let parsed = Url::parse(&site.url)
                .with_context(|| format!("site url '{}' is not a valid URL", site.url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("site url '{}' must use http or https", site.url);
            }
            if !seen.insert(site.url.as_str()) {
                bail!("site url '{}' is listed more than once", site.url);
            }
        }

        validate_proxy(&self.proxy)?;
        ensure!(self.check_interval > 0, "check_interval must be greater than zero");
        ensure!(self.request_timeout > 0, "request_timeout must be greater than zero");
        ensure!(!self.email.to.is_empty(), "email.to must name at least one recipient");

        Ok(())
    }
}

fn validate_proxy(proxy: &str) -> Result<()> {
    let Some((host, port)) = proxy.rsplit_once(':') else {
        bail!("proxy '{proxy}' must be in host:port form");
    };
    ensure!(!host.is_empty(), "proxy '{proxy}' is missing a host");
    port.parse::<u16>()
        .with_context(|| format!("proxy '{proxy}' has an invalid port"))?;
    Ok(())
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(address) => vec![address],
        OneOrMany::Many(addresses) => addresses,
    })
}
