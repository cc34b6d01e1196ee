//! The shared feed document.
//!
//! A single JSON array of entries, read with `GET` and replaced wholesale with
//! `POST`. There is no versioning: every writer does read-then-write, so two
//! concurrent writers can lose one another's append.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::datatypes::{seed_feed, Entry};
use crate::error::{RelayError, RelayResult};
use crate::storage::{load_json, save_json, LocalStore};

/// Key of the document kept by [`StoreRemote`].
pub const REMOTE_FEED_KEY: &str = "relay_remote_feed";

/// Outcome of reading the shared document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Found(Vec<Entry>),
    /// The document was never written.
    NotFound,
}

impl Fetched {
    /// The fetched entries, or the seed feed for a missing document.
    pub fn or_seed(self, now: DateTime<Utc>) -> Vec<Entry> {
        match self {
            Fetched::Found(entries) => entries,
            Fetched::NotFound => seed_feed(now),
        }
    }
}

pub trait FeedRemote: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, RelayResult<Fetched>>;

    /// Replaces the whole document with `entries`.
    fn upload<'a>(&'a self, entries: &'a [Entry]) -> BoxFuture<'a, RelayResult<()>>;
}

/// Document behind a public key-value HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRemote {
    pub fn new(endpoint: &str, timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(client, endpoint)
    }

    /// Uses a pre-configured client, e.g. one shared with other components.
    pub fn with_client(client: reqwest::Client, endpoint: &str) -> RelayResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RelayError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn get_document(&self) -> RelayResult<Fetched> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Fetched::NotFound),
            status if status.is_success() => {
                let body = response.bytes().await?;
                // Some stores answer `null` for a key that was never set.
                let entries: Option<Vec<Entry>> = serde_json::from_slice(&body)?;
                debug!(len = body.len(), "fetched feed document");
                Ok(entries.map_or(Fetched::NotFound, Fetched::Found))
            }
            status => Err(RelayError::Status(status.as_u16())),
        }
    }

    async fn post_document(&self, entries: &[Entry]) -> RelayResult<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(entries)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }
        debug!(entries = entries.len(), "uploaded feed document");
        Ok(())
    }
}

impl FeedRemote for HttpRemote {
    fn fetch(&self) -> BoxFuture<'_, RelayResult<Fetched>> {
        self.get_document().boxed()
    }

    fn upload<'a>(&'a self, entries: &'a [Entry]) -> BoxFuture<'a, RelayResult<()>> {
        self.post_document(entries).boxed()
    }
}

/// Document kept in a local store: a relay with no network, shared only by
/// clients of the same profile.
#[derive(Clone)]
pub struct StoreRemote {
    store: Arc<dyn LocalStore>,
}

impl StoreRemote {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }
}

impl FeedRemote for StoreRemote {
    fn fetch(&self) -> BoxFuture<'_, RelayResult<Fetched>> {
        let fetched = load_json::<Vec<Entry>>(self.store.as_ref(), REMOTE_FEED_KEY)
            .map(|entries| entries.map_or(Fetched::NotFound, Fetched::Found));
        future::ready(fetched).boxed()
    }

    fn upload<'a>(&'a self, entries: &'a [Entry]) -> BoxFuture<'a, RelayResult<()>> {
        future::ready(save_json(self.store.as_ref(), REMOTE_FEED_KEY, entries)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::now_millis;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn store_remote_starts_empty_then_holds_uploads() {
        let store = MemoryStore::new();
        let remote = StoreRemote::new(Arc::new(store.clone()));

        assert_eq!(remote.fetch().await.unwrap(), Fetched::NotFound);

        let feed = vec![Entry::new("NODE_A", "first")];
        remote.upload(&feed).await.unwrap();

        assert_eq!(remote.fetch().await.unwrap(), Fetched::Found(feed));
        assert!(store.get(REMOTE_FEED_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn store_remote_reports_corrupt_documents() {
        let store = MemoryStore::new();
        store.set(REMOTE_FEED_KEY, "[{\"id\":").unwrap();
        let remote = StoreRemote::new(Arc::new(store));

        assert!(matches!(remote.fetch().await, Err(RelayError::Decode(_))));
    }

    #[test]
    fn missing_document_falls_back_to_seed() {
        let now = now_millis();
        assert_eq!(Fetched::NotFound.or_seed(now), seed_feed(now));
        assert!(Fetched::Found(vec![]).or_seed(now).is_empty());
    }

    #[test]
    fn endpoint_must_parse() {
        assert!(matches!(
            HttpRemote::new("not a url", Duration::from_secs(1)),
            Err(RelayError::Config(_))
        ));
        let remote = HttpRemote::new("http://127.0.0.1:9/feed", Duration::from_secs(1)).unwrap();
        assert_eq!(remote.endpoint().path(), "/feed");
    }
}
