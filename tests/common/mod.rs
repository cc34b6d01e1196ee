#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use relay::util::Handle;
use relay::{Entry, FeedRemote, Fetched, RelayError, RelayResult};
use tokio::sync::Barrier;

/// The shared document, as seen by any number of clients.
#[derive(Clone, Default)]
pub struct SharedRemote {
    document: Handle<Option<Vec<Entry>>>,
    pub fail_fetch: Arc<AtomicBool>,
    pub uploads: Arc<AtomicUsize>,
    /// When set, every fetch waits here after reading the document.
    fetch_barrier: Option<Arc<Barrier>>,
}

impl SharedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches rendezvous in groups of `parties` before returning.
    pub fn with_fetch_barrier(parties: usize) -> Self {
        Self {
            fetch_barrier: Some(Arc::new(Barrier::new(parties))),
            ..Self::default()
        }
    }

    pub fn document(&self) -> Option<Vec<Entry>> {
        self.document.get().clone()
    }

    pub fn set_document(&self, entries: Vec<Entry>) {
        *self.document.get_mut() = Some(entries);
    }
}

impl FeedRemote for SharedRemote {
    fn fetch(&self) -> BoxFuture<'_, RelayResult<Fetched>> {
        async move {
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(RelayError::Status(502));
            }
            let fetched = self.document().map_or(Fetched::NotFound, Fetched::Found);
            if let Some(barrier) = &self.fetch_barrier {
                barrier.wait().await;
            }
            Ok(fetched)
        }
        .boxed()
    }

    fn upload<'a>(&'a self, entries: &'a [Entry]) -> BoxFuture<'a, RelayResult<()>> {
        async move {
            self.set_document(entries.to_vec());
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}
