use std::fmt::Display;

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender name of entries authored by the relay itself.
pub const SYSTEM_SENDER: &str = "SYSTEM_CORE";

/// Most recent entries kept in the shared document on every write.
pub const FEED_CAP: usize = 100;

/// Entries older than this are hidden from display.
pub const RETENTION_DAYS: u32 = 30;

/// One broadcast message. Never mutated once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub sender: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// Creates an entry authored now, with a fresh id.
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            text: text.into(),
            timestamp: now_millis(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Age relative to `now`; negative for entries from a skewed clock.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} |> {}",
            self.timestamp.with_timezone(&Local).format("%Y.%m.%d %H:%M:%S"),
            self.sender,
            self.text
        )
    }
}

/// State of the last network operation, surfaced to the view layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Current instant at the millisecond precision used on the wire.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Feed shown when the shared document does not exist yet.
pub fn seed_feed(now: DateTime<Utc>) -> Vec<Entry> {
    let seed = |id: &str, sender: &str, text: &str, seconds_ago: i64| Entry {
        id: id.to_owned(),
        sender: sender.to_owned(),
        text: text.to_owned(),
        timestamp: now - Duration::seconds(seconds_ago),
    };

    vec![
        seed("sys-1", SYSTEM_SENDER, "Neural relay established. Data retention policy: 30 Days.", 1000),
        seed("user-1", "NODE_49X1", "This portfolio is from the future! Love the 3D gallery.", 500),
        seed("user-2", "NODE_88B2", "Qizzy is definitely a jack of all trades. Inspiring stuff.", 100),
    ]
}

/// Keeps only entries younger than `retention`, preserving order.
pub fn retain_recent(mut entries: Vec<Entry>, retention: Duration, now: DateTime<Utc>) -> Vec<Entry> {
    entries.retain(|entry| entry.age(now) < retention);
    entries
}

/// Drops the oldest entries until at most `cap` remain.
pub fn truncate_to_recent(entries: &mut Vec<Entry>, cap: usize) {
    if entries.len() > cap {
        let excess = entries.len() - cap;
        entries.drain(..excess);
    }
}

/// Short relative age: "Today 14:05", "Yesterday 09:30" or "12d ago".
pub fn format_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - timestamp).num_days();
    let clock = timestamp.with_timezone(&Local).format("%H:%M");

    match days {
        i64::MIN..=0 => format!("Today {clock}"),
        1 => format!("Yesterday {clock}"),
        days => format!("{days}d ago"),
    }
}
