//! Anonymous message relay over a shared JSON document.
//!
//! Each profile gets a pseudonymous handle, polls the shared feed, hides
//! entries past the retention window and republishes the merged list on every
//! send. Writers race with last-writer-wins semantics.

pub mod config;
pub mod datatypes;
pub mod error;
pub mod identity;
pub mod relay;
pub mod remote;
pub mod storage;
pub mod util;

pub use config::RelayConfig;
pub use datatypes::{Entry, SyncStatus};
pub use error::{RelayError, RelayResult};
pub use identity::IdentityManager;
pub use relay::{Relay, RelayOptions, RelaySnapshot};
pub use remote::{FeedRemote, Fetched, HttpRemote, StoreRemote};
pub use storage::{FileStore, LocalStore, MemoryStore};
