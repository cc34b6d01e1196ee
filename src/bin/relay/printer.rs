use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay::datatypes::format_age;
use relay::{Entry, Relay, RelaySnapshot, SyncStatus};

pub fn print_entry(entry: &Entry, own_handle: &str, now: DateTime<Utc>) {
    let marker = if entry.is_system() {
        '#'
    } else if entry.sender == own_handle {
        '>'
    } else {
        ' '
    };
    println!("\r[{}] {marker} {} |> {}", format_age(entry.timestamp, now), entry.sender, entry.text);
}

pub fn print_feed(snapshot: &RelaySnapshot) {
    let now = Utc::now();
    if snapshot.feed.is_empty() {
        println!("\r(feed is empty)");
    }
    for entry in &snapshot.feed {
        print_entry(entry, &snapshot.handle, now);
    }
}

pub fn print_status(snapshot: &RelaySnapshot) {
    println!("\rIdentify: {} | status: {} | {} entries", snapshot.handle, snapshot.status, snapshot.feed.len());
    if !snapshot.draft.is_empty() {
        println!("\rPending: '{}' (type /retry to resend)", snapshot.draft);
    }
}

/// Remembers which entries were already printed.
#[derive(Debug, Default)]
pub struct SeenEntries {
    ids: HashSet<String>,
}

impl SeenEntries {
    /// Entries of `snapshot` not returned before.
    ///
    /// An idle feed is authoritative, so ids no longer in it are forgotten.
    /// Other feeds may be a partial cache and leave the set untouched.
    pub fn unseen<'a>(&mut self, snapshot: &'a RelaySnapshot) -> Vec<&'a Entry> {
        if snapshot.status == SyncStatus::Idle {
            self.ids.retain(|id| snapshot.feed.iter().any(|entry| &entry.id == id));
        }
        snapshot
            .feed
            .iter()
            .filter(|entry| self.ids.insert(entry.id.clone()))
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Prints entries as they first appear in the feed, and status transitions.
/// Runs until aborted.
pub async fn print_feed_updates(relay: Arc<Relay>) {
    let mut changes = relay.subscribe();
    let mut seen = SeenEntries::default();
    let mut disrupted = false;

    loop {
        let snapshot = relay.snapshot();
        let now = Utc::now();

        for entry in seen.unseen(&snapshot) {
            print_entry(entry, &snapshot.handle, now);
        }

        match snapshot.status {
            SyncStatus::Error if !disrupted => {
                println!(
                    "\r! Uplink disrupted, showing {} cached entries. Type /retry to reconnect.",
                    snapshot.feed.len()
                );
                disrupted = true;
            }
            SyncStatus::Idle if disrupted => {
                println!("\r* Uplink restored.");
                disrupted = false;
            }
            _ => {}
        }

        if changes.changed().await.is_err() {
            break;
        }
    }
}
