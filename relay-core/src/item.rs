use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FIELD_TITLE: &str = "title";
pub const FIELD_LINK: &str = "link";
pub const FIELD_GUID: &str = "guid";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_PUBDATE: &str = "pubdate";
pub const FIELD_AUTHOR: &str = "author";
pub const FIELD_CATEGORIES: &str = "categories";

/// A fetched content entry.
///
/// `attributes` is the raw bag as parsed from the feed; `identity` is filled in
/// by [`crate::identity::resolve_batch`] and is empty until then.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub identity: String,
}

impl Item {
    pub fn from_attributes<I, K, V>(attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut item = Self::default();
        for (key, value) in attrs {
            item.set(key, value);
        }
        item
    }

    /// Sets an attribute. Blank values are dropped so that "present" always
    /// means "present and non-empty".
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        self.attributes.insert(key.into(), value);
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.field(FIELD_TITLE)
    }

    pub fn link(&self) -> Option<&str> {
        self.field(FIELD_LINK)
    }

    pub fn guid(&self) -> Option<&str> {
        self.field(FIELD_GUID)
    }

    pub fn description(&self) -> Option<&str> {
        self.field(FIELD_DESCRIPTION)
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.field(FIELD_PUBDATE)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn from_rss_item(item: &rss::Item) -> Self {
        let mut out = Self::default();
        if let Some(title) = item.title() {
            out.set(FIELD_TITLE, title);
        }
        if let Some(link) = item.link() {
            out.set(FIELD_LINK, link);
        }
        if let Some(guid) = item.guid() {
            out.set(FIELD_GUID, guid.value());
        }
        if let Some(description) = item.description() {
            out.set(FIELD_DESCRIPTION, description);
        }
        if let Some(published) = item
            .pub_date()
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        {
            out.set(FIELD_PUBDATE, published.with_timezone(&Utc).to_rfc3339());
        }

        let author = item
            .dublin_core_ext()
            .and_then(|dc| dc.creators().first().cloned())
            .or_else(|| item.author().map(ToOwned::to_owned));
        if let Some(author) = author {
            out.set(FIELD_AUTHOR, author);
        }

        let categories: Vec<&str> = item.categories().iter().map(|c| c.name()).collect();
        if !categories.is_empty() {
            out.set(FIELD_CATEGORIES, categories.join(","));
        }
        out
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        let mut out = Self::default();
        out.set(FIELD_TITLE, entry.title().as_str());
        out.set(FIELD_GUID, entry.id());
        if let Some(link) = entry
            .links()
            .iter()
            .find(|l| l.rel() == "alternate")
            .or_else(|| entry.links().first())
        {
            out.set(FIELD_LINK, link.href());
        }
        let description = entry
            .summary()
            .map(|s| s.as_str().to_owned())
            .or_else(|| entry.content().and_then(|c| c.value()).map(ToOwned::to_owned));
        if let Some(description) = description {
            out.set(FIELD_DESCRIPTION, description);
        }
        let published = entry.published().copied().unwrap_or_else(|| *entry.updated());
        out.set(FIELD_PUBDATE, published.with_timezone(&Utc).to_rfc3339());
        if let Some(author) = entry.authors().first() {
            out.set(FIELD_AUTHOR, author.name());
        }
        let categories: Vec<&str> = entry.categories().iter().map(|c| c.term()).collect();
        if !categories.is_empty() {
            out.set(FIELD_CATEGORIES, categories.join(","));
        }
        out
    }
}
