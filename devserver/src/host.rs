//! Devserver endpoint

use url::Url;

use crate::storage::settings::HostnameAddr;

/// One devserver endpoint, e.g. `http://10.1.1.10:8082`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    url: String,
}

impl Host {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Base URL as configured
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host part of the URL. Usually an IP address in lab configurations.
    pub fn hostname(&self) -> String {
        hostname_of(&self.url)
    }

    /// Hostname looked up from the configured address table, falling back to
    /// [`Host::hostname`]. The first matching entry wins.
    pub fn resolved_hostname(&self, table: &[HostnameAddr]) -> String {
        reverse_lookup(&self.hostname(), table)
    }

    /// Devserver URL (scheme and authority) of a job repo URL
    pub fn server_url(repo_url: &str) -> Option<String> {
        let parsed = Url::parse(repo_url).ok()?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        })
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Host part of a URL, or the input itself when it does not parse
pub fn hostname_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Map an address back to its configured hostname
pub fn reverse_lookup(address: &str, table: &[HostnameAddr]) -> String {
    table
        .iter()
        .find(|entry| entry.address == address)
        .map(|entry| entry.hostname.clone())
        .unwrap_or_else(|| address.to_string())
}
