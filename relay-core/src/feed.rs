use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourceHealth {
    #[default]
    Healthy,
    PermanentlyDisabled,
}

/// Per-source request settings that cannot be shared with bulk fetches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdvancedOptions {
    #[serde(default)]
    pub cookies: Vec<(String, String)>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl AdvancedOptions {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.headers.is_empty()
    }

    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// One subscriber's binding to a fetch target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    pub owner_id: String,
    pub target: String,
    #[serde(default)]
    pub advanced: Option<AdvancedOptions>,
    /// Filter rules, interpreted by the configured `ArticleFilter`.
    #[serde(default)]
    pub filters: serde_json::Value,
    #[serde(default)]
    pub destinations: Vec<String>,
    /// Extra fields recorded alongside identities.
    #[serde(default)]
    pub comparisons: Vec<String>,
    /// Fields whose previously seen values suppress an otherwise new item.
    #[serde(default)]
    pub blocking_comparisons: Vec<String>,
    #[serde(default)]
    pub health: SourceHealth,
}

impl Source {
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: String::new(),
            target: target.into(),
            advanced: None,
            filters: serde_json::Value::Null,
            destinations: Vec::new(),
            comparisons: Vec::new(),
            blocking_comparisons: Vec::new(),
            health: SourceHealth::Healthy,
        }
    }

    pub fn has_advanced_options(&self) -> bool {
        self.advanced.as_ref().map_or(false, |opts| !opts.is_empty())
    }

    /// Basic sanity: an id and an http(s) target.
    pub fn is_valid(&self) -> bool {
        if self.id.trim().is_empty() {
            return false;
        }
        match url::Url::parse(&self.target) {
            Ok(url) => matches!(url.scheme(), "http" | "https"),
            Err(_) => false,
        }
    }
}

/// Yields the current subscriber set at the start of every cycle.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn current_sources(&self) -> Vec<Source>;
}

pub type SharedSourceList = Arc<RwLock<Vec<Source>>>;

pub fn shared_source_list(initial: Vec<Source>) -> SharedSourceList {
    Arc::new(RwLock::new(initial))
}

pub async fn add_source(store: &SharedSourceList, source: Source) {
    let mut sources = store.write().await;
    sources.retain(|existing| existing.id != source.id);
    sources.push(source);
}

pub async fn remove_source(store: &SharedSourceList, source_id: &str) {
    let mut sources = store.write().await;
    sources.retain(|existing| existing.id != source_id);
}

pub async fn list_sources(store: &SharedSourceList) -> Vec<Source> {
    store.read().await.clone()
}

#[async_trait]
impl SourceProvider for SharedSourceList {
    async fn current_sources(&self) -> Vec<Source> {
        list_sources(self).await
    }
}
