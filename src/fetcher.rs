//! HTTP fetcher for the provider-published allow-list.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AllowlistConfig;
use crate::error::FetchError;
use crate::policy::AllowEntry;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 1000;

/// Maximum accepted response size (2 MB)
/// Monitoring provider lists are a few KB; anything larger is not an IP list
const MAX_RESPONSE_SIZE: usize = 2 * 1024 * 1024;

/// Where and how to read prefixes out of a provider response.
#[derive(Debug, Clone)]
pub struct ListFormat {
    /// Dotted path to the array of entries, `None` for a top-level array
    pub items_path: Option<String>,
    /// Field holding the network prefix inside each object
    pub prefix_field: String,
    pub label: String,
    pub ports: Vec<u32>,
}

impl ListFormat {
    pub fn from_config(config: &AllowlistConfig) -> Self {
        Self {
            items_path: config.items_path.clone(),
            prefix_field: config.prefix_field.clone(),
            label: config.label.clone(),
            ports: config.ports.iter().map(|p| u32::from(*p)).collect(),
        }
    }
}

/// Anything that can produce the current allow-list for a pass.
#[async_trait]
pub trait AllowListSource: Send + Sync {
    async fn fetch_allow_list(&self) -> Result<Vec<AllowEntry>, FetchError>;
}

/// The configured provider endpoint, fetched over HTTP(S).
pub struct RemoteAllowList {
    fetcher: Fetcher,
    source_url: String,
    timeout: Duration,
}

impl RemoteAllowList {
    pub fn from_config(config: &AllowlistConfig) -> Result<Self, FetchError> {
        Ok(Self {
            fetcher: Fetcher::new(ListFormat::from_config(config))?,
            source_url: config.source_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

#[async_trait]
impl AllowListSource for RemoteAllowList {
    async fn fetch_allow_list(&self) -> Result<Vec<AllowEntry>, FetchError> {
        self.fetcher.fetch(&self.source_url, self.timeout).await
    }
}

/// HTTP client for the allow-list provider
pub struct Fetcher {
    client: Client,
    format: ListFormat,
}

impl Fetcher {
    pub fn new(format: ListFormat) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(format!("jailsync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, format })
    }

    /// Retrieve and validate the allow-list.
    ///
    /// `timeout` bounds the whole download, retries and backoff included.
    /// Zero usable entries is always an error so callers can never mistake a
    /// provider hiccup for "allow nothing".
    pub async fn fetch(
        &self,
        source_url: &str,
        timeout: Duration,
    ) -> Result<Vec<AllowEntry>, FetchError> {
        info!("Fetching allow-list from {}...", source_url);
        let body = tokio::time::timeout(timeout, self.fetch_with_retry(source_url, timeout))
            .await
            .map_err(|_| {
                FetchError::network(format!(
                    "No usable response from {} within {:?}",
                    source_url, timeout
                ))
            })??;
        let entries = parse_allow_list(&body, &self.format)?;
        info!("Fetched allow-list - {} prefixes", entries.len());
        Ok(entries)
    }

    async fn fetch_with_retry(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_DELAY_MS * (1 << (attempt - 1));
                debug!("Retry {} after {}ms for {}", attempt, delay, url);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.fetch_once(url, timeout).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    debug!("Attempt {} failed: {}", attempt + 1, e.message);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::network("No attempt made")))
    }

    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::network(describe_reqwest_error(&e)))?;

        if !response.status().is_success() {
            return Err(FetchError::network(format!("HTTP {}", response.status())));
        }

        if let Some(length) = response.content_length() {
            if length as usize > MAX_RESPONSE_SIZE {
                return Err(FetchError::parse(format!(
                    "Response too large: {} bytes (max: {} bytes)",
                    length, MAX_RESPONSE_SIZE
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(describe_reqwest_error(&e)))?;

        if body.len() > MAX_RESPONSE_SIZE {
            return Err(FetchError::parse(format!(
                "Downloaded content too large: {} bytes (max: {} bytes)",
                body.len(),
                MAX_RESPONSE_SIZE
            )));
        }

        Ok(body)
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Parse a provider response into validated, de-duplicated allow entries.
///
/// Individually malformed entries are skipped with a warning; the result is
/// an error only when nothing usable remains.
pub fn parse_allow_list(body: &str, format: &ListFormat) -> Result<Vec<AllowEntry>, FetchError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("Response is not valid JSON: {}", e)))?;

    let items = locate_items(&root, format.items_path.as_deref())?;
    if items.is_empty() {
        return Err(FetchError::empty("Provider returned zero entries"));
    }

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut malformed = 0usize;

    for (index, item) in items.iter().enumerate() {
        let raw = match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get(&format.prefix_field).and_then(Value::as_str),
            _ => None,
        };

        let Some(raw) = raw else {
            warn!(
                "Skipping allow-list entry #{}: no '{}' field",
                index, format.prefix_field
            );
            malformed += 1;
            continue;
        };

        match AllowEntry::new(raw, &format.ports, &format.label) {
            Ok(entry) => {
                if seen.insert(entry.network_prefix) {
                    entries.push(entry);
                }
            }
            Err(e) => {
                warn!("Skipping allow-list entry #{}: {}", index, e);
                malformed += 1;
            }
        }
    }

    if entries.is_empty() {
        return Err(FetchError::parse(format!(
            "All {} entries were malformed",
            malformed
        )));
    }

    if malformed > 0 {
        warn!("{} of {} allow-list entries skipped", malformed, items.len());
    }

    Ok(entries)
}

fn locate_items<'a>(root: &'a Value, path: Option<&str>) -> Result<&'a Vec<Value>, FetchError> {
    let mut node = root;
    if let Some(path) = path.filter(|p| !p.is_empty()) {
        for key in path.split('.') {
            node = node.get(key).ok_or_else(|| {
                FetchError::parse(format!("Field '{}' not found in response (path '{}')", key, path))
            })?;
        }
    }

    node.as_array()
        .ok_or_else(|| FetchError::parse("Expected an array of entries"))
}
