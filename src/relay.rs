//! Feed synchronizer and publisher.
//!
//! [`Relay`] owns the observed state (feed, status, pending draft) and the
//! identity. A rendering layer reads it through [`Relay::snapshot`] and
//! [`Relay::subscribe`], and drives it with [`Relay::send`],
//! [`Relay::update_identity`] and [`Relay::refresh`].
//!
//! Polling and publishing run as independent tasks that only meet in the
//! shared state cell. A publish holds the in-flight flag from its re-fetch
//! until its upload resolves; poll ticks that land in that window are skipped.
//! A fetch that was overtaken by a publish, whether still running or already
//! committed, is dropped.
//! Nothing coordinates with *other* clients: a concurrent writer between our
//! re-fetch and upload loses its append, or we lose ours.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::datatypes::{retain_recent, truncate_to_recent, Entry, SyncStatus, FEED_CAP, RETENTION_DAYS};
use crate::error::{RelayError, RelayResult};
use crate::identity::IdentityManager;
use crate::remote::FeedRemote;
use crate::storage::{load_json, save_json, LocalStore, FEED_CACHE_KEY};
use crate::util::Handle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// `None` fetches once when started, with no recurring poll.
    pub poll_interval: Option<Duration>,
    pub retention: chrono::Duration,
    pub feed_cap: usize,
    pub normalize_handles: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_secs(10)),
            retention: chrono::Duration::days(i64::from(RETENTION_DAYS)),
            feed_cap: FEED_CAP,
            normalize_handles: true,
        }
    }
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retention: config.retention(),
            feed_cap: config.feed_cap,
            normalize_handles: config.normalize_handles,
        }
    }
}

/// What a rendering layer needs to draw the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
    /// Oldest first, all within the retention window.
    pub feed: Vec<Entry>,
    pub handle: String,
    pub status: SyncStatus,
    /// Text of a send that has not gone through yet.
    pub draft: String,
}

#[derive(Debug, Default)]
struct RelayState {
    feed: Vec<Entry>,
    status: SyncStatus,
    draft: String,
}

pub struct Relay {
    remote: Arc<dyn FeedRemote>,
    store: Arc<dyn LocalStore>,
    options: RelayOptions,

    identity: Handle<IdentityManager>,
    state: Handle<RelayState>,
    changes: watch::Sender<u64>,

    publishing: AtomicBool,
    /// Bumped by every committed publish.
    publish_epoch: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Relay {
    /// Initializes the identity and shows the cached feed until the first fetch.
    pub fn open(
        remote: Arc<dyn FeedRemote>,
        store: Arc<dyn LocalStore>,
        options: RelayOptions,
    ) -> RelayResult<Arc<Self>> {
        let identity = IdentityManager::load_or_create(store.clone(), options.normalize_handles)?;
        let (changes, _) = watch::channel(0);

        let relay = Self {
            remote,
            store,
            options,
            identity: Handle::from(identity),
            state: Handle::default(),
            changes,
            publishing: AtomicBool::new(false),
            publish_epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };

        let cached = relay.cached_feed();
        relay.state.update(|state| state.feed = cached);

        Ok(Arc::new(relay))
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        let state = self.state.get();
        RelaySnapshot {
            feed: state.feed.clone(),
            handle: self.handle(),
            status: state.status,
            draft: state.draft.clone(),
        }
    }

    pub fn handle(&self) -> String {
        self.identity.get().handle().to_owned()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.get().status
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Ticks every time the observed state changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::Acquire)
    }

    /// Spawns the poller: one fetch right away, then one per poll interval.
    ///
    /// The task keeps only a weak reference and ends on [`Relay::shutdown`]
    /// or when the last strong reference is dropped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::downgrade(self);
        let period = self.options.poll_interval;
        let cancel = self.cancel.clone();
        tokio::spawn(poll_while_alive(relay, period, cancel))
    }

    /// Stops the poller. Requests still in flight complete but no longer
    /// change any state.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
            debug!("relay shut down");
        }
    }

    /// Fetches the shared document and displays it.
    ///
    /// On failure the cached feed is displayed instead and the status turns
    /// to [`SyncStatus::Error`]; the error is returned for the caller to log.
    /// A result overtaken by a publish of this relay is dropped unseen.
    /// Returns the number of displayed entries.
    pub async fn refresh(&self) -> RelayResult<usize> {
        self.ensure_open()?;
        if self.is_publishing() {
            return Err(RelayError::Busy);
        }
        let epoch = self.publish_epoch.load(Ordering::Acquire);
        self.commit(|state| state.status = SyncStatus::Syncing)?;

        let fetched = self.remote.fetch().await;
        let now = Utc::now();

        match fetched {
            Ok(fetched) => {
                let feed = retain_recent(fetched.or_seed(now), self.options.retention, now);
                let shown = feed.len();
                let applied = self.commit_if(
                    || self.fetch_is_current(epoch),
                    |state| {
                        self.mirror_cache(&feed);
                        state.feed = feed;
                        state.status = SyncStatus::Idle;
                    },
                )?;
                if !applied {
                    debug!("publish overtook fetch, discarding fetched feed");
                    return Ok(self.state.get().feed.len());
                }
                Ok(shown)
            }
            Err(err) => {
                let cached = self.cached_feed();
                let shown = cached.len();
                let applied = self.commit_if(
                    || self.fetch_is_current(epoch),
                    |state| {
                        state.feed = cached;
                        state.status = SyncStatus::Error;
                    },
                )?;
                if applied {
                    warn!(error = %err, cached = shown, "feed fetch failed, showing cached feed");
                } else {
                    debug!(error = %err, "publish overtook failed fetch");
                }
                Err(err)
            }
        }
    }

    /// Appends `text` to the shared document as the current handle.
    ///
    /// Blank text and a send while another is in flight are rejected before
    /// touching any state. On failure the trimmed text stays in the draft
    /// for a manual retry.
    pub async fn send(&self, text: &str) -> RelayResult<Entry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RelayError::Validation("message text is empty"));
        }
        self.ensure_open()?;

        if self
            .publishing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::Busy);
        }
        let _in_flight = InFlight(&self.publishing);

        self.commit(|state| {
            state.draft = text.to_owned();
            state.status = SyncStatus::Syncing;
        })?;

        match self.publish(text).await {
            Ok((entry, merged)) => {
                let now = Utc::now();
                let feed = retain_recent(merged.clone(), self.options.retention, now);
                self.commit(|state| {
                    state.feed = feed;
                    state.draft.clear();
                    state.status = SyncStatus::Idle;
                    self.publish_epoch.fetch_add(1, Ordering::AcqRel);
                    self.mirror_cache(&merged);
                })?;
                info!(id = %entry.id, sender = %entry.sender, feed = merged.len(), "entry published");
                Ok(entry)
            }
            Err(err) => {
                warn!(error = %err, "publish failed, draft kept for retry");
                self.commit(|state| state.status = SyncStatus::Error)?;
                Err(err)
            }
        }
    }

    /// Replaces the handle used for future entries. Past entries keep theirs.
    pub fn update_identity(&self, candidate: &str) -> RelayResult<String> {
        self.ensure_open()?;
        let handle = self.identity.update(|identity| identity.update(candidate).map(str::to_owned))?;
        self.changes.send_modify(|version| *version += 1);
        Ok(handle)
    }

    /// Re-fetch, append, cap, upload. Returns the new entry and the uploaded list.
    async fn publish(&self, text: &str) -> RelayResult<(Entry, Vec<Entry>)> {
        let mut merged = self.remote.fetch().await?.or_seed(Utc::now());

        let entry = Entry::new(self.handle(), text);
        merged.push(entry.clone());
        truncate_to_recent(&mut merged, self.options.feed_cap);

        self.remote.upload(&merged).await?;
        Ok((entry, merged))
    }

    async fn poll_tick(&self) {
        if self.is_publishing() {
            debug!("publish in flight, skipping poll");
            return;
        }
        // Failures are logged by refresh.
        if let Ok(shown) = self.refresh().await {
            debug!(shown, "poll complete");
        }
    }

    fn ensure_open(&self) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        Ok(())
    }

    /// Applies `apply` to the state unless the relay was shut down.
    fn commit(&self, apply: impl FnOnce(&mut RelayState)) -> RelayResult<()> {
        self.commit_if(|| true, apply).map(|_| ())
    }

    /// Like [`Relay::commit`], but skips `apply` unless `current` holds under
    /// the state lock. Returns whether `apply` ran.
    fn commit_if(
        &self,
        current: impl FnOnce() -> bool,
        apply: impl FnOnce(&mut RelayState),
    ) -> RelayResult<bool> {
        {
            let mut state = self.state.get_mut();
            if self.is_closed() {
                return Err(RelayError::Closed);
            }
            if !current() {
                return Ok(false);
            }
            apply(&mut state);
        }
        self.changes.send_modify(|version| *version += 1);
        Ok(true)
    }

    /// No publish is running and none committed since `epoch` was read.
    fn fetch_is_current(&self, epoch: u64) -> bool {
        !self.is_publishing() && self.publish_epoch.load(Ordering::Acquire) == epoch
    }

    /// Retention-filtered feed from the local cache; empty if absent or corrupt.
    fn cached_feed(&self) -> Vec<Entry> {
        match load_json::<Vec<Entry>>(self.store.as_ref(), FEED_CACHE_KEY) {
            Ok(Some(feed)) => retain_recent(feed, self.options.retention, Utc::now()),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable feed cache");
                Vec::new()
            }
        }
    }

    /// Called under the state lock so cache writes follow commit order.
    fn mirror_cache(&self, feed: &[Entry]) {
        if let Err(err) = save_json(self.store.as_ref(), FEED_CACHE_KEY, feed) {
            warn!(error = %err, "failed to write feed cache");
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Clears the in-flight flag when the publish ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn poll_while_alive(relay: Weak<Relay>, period: Option<Duration>, cancel: CancellationToken) {
    let Some(period) = period else {
        if let Some(relay) = relay.upgrade() {
            relay.poll_tick().await;
        }
        return;
    };

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match relay.upgrade() {
            Some(relay) => relay.poll_tick().await,
            None => break,
        }
    }
    debug!("poller stopped");
}
