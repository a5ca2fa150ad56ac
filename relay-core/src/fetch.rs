use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue, COOKIE};
use reqwest::{redirect, Client};
use tracing::debug;

use crate::error::FetchError;
use crate::feed::AdvancedOptions;
use crate::identity;
use crate::item::Item;

/// Result of fetching one target within a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    Ok(Vec<Item>),
    Failed(FetchError),
    Timeout,
}

impl TargetOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, TargetOutcome::Ok(_))
    }
}

impl From<Result<Vec<Item>, FetchError>> for TargetOutcome {
    fn from(result: Result<Vec<Item>, FetchError>) -> Self {
        match result {
            Ok(items) => TargetOutcome::Ok(items),
            Err(FetchError::Timeout) => TargetOutcome::Timeout,
            Err(err) => TargetOutcome::Failed(err),
        }
    }
}

/// Retrieves and parses a target into items with resolved identities.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        target: &str,
        options: Option<&AdvancedOptions>,
    ) -> Result<Vec<Item>, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(5))
            .timeout(timeout)
            .user_agent(concat!("feedrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        target: &str,
        options: Option<&AdvancedOptions>,
    ) -> Result<Vec<Item>, FetchError> {
        let mut request = self.client.get(target);
        if let Some(options) = options {
            if let Some(cookie) = options.cookie_header() {
                request = request.header(COOKIE, cookie);
            }
            for (name, value) in &options.headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| FetchError::Transport(e.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| FetchError::Transport(e.to_string()))?;
                request = request.header(name, value);
            }
        }

        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let mut items = parse_feed(&bytes)?;
        let id_type = identity::resolve_batch(&mut items);
        debug!(url = target, items = items.len(), ?id_type, "fetched target");
        Ok(items)
    }
}

/// Parses an RSS document, falling back to Atom.
pub fn parse_feed(bytes: &Bytes) -> Result<Vec<Item>, FetchError> {
    let rss_err = match rss::Channel::read_from(&bytes[..]) {
        Ok(channel) => return Ok(channel.items().iter().map(Item::from_rss_item).collect()),
        Err(err) => err,
    };
    match atom_syndication::Feed::read_from(&bytes[..]) {
        Ok(feed) => Ok(feed.entries().iter().map(Item::from_atom_entry).collect()),
        Err(_) => Err(FetchError::InvalidFormat(rss_err.to_string())),
    }
}
