use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};
use crate::storage::{LocalStore, IDENTITY_KEY};

pub const HANDLE_PREFIX: &str = "NODE_";
pub const MAX_HANDLE_LEN: usize = 15;

const SUFFIX_LEN: usize = 4;
const SUFFIX_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Largest multiple of the alphabet size that fits in a byte.
const UNBIASED_LIMIT: u8 = 252;

/// Pseudonymous handle of this profile, persisted in local storage.
pub struct IdentityManager {
    store: Arc<dyn LocalStore>,
    handle: String,
    normalize: bool,
}

impl IdentityManager {
    /// Reads the persisted handle, generating and persisting one if absent.
    ///
    /// `normalize` upper-cases handles set through [`IdentityManager::update`].
    pub fn load_or_create(store: Arc<dyn LocalStore>, normalize: bool) -> RelayResult<Self> {
        let saved = store.get(IDENTITY_KEY)?.filter(|handle| !handle.trim().is_empty());

        let handle = match saved {
            Some(handle) => {
                debug!(%handle, "loaded identity");
                handle
            }
            None => {
                let handle = generate_handle()?;
                store.set(IDENTITY_KEY, &handle)?;
                info!(%handle, "generated new identity");
                handle
            }
        };

        Ok(Self { store, handle, normalize })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Replaces the handle. Blank input is rejected and changes nothing.
    pub fn update(&mut self, candidate: &str) -> RelayResult<&str> {
        let handle = normalize_handle(candidate, self.normalize)
            .ok_or(RelayError::Validation("handle is empty"))?;

        self.store.set(IDENTITY_KEY, &handle)?;
        info!(from = %self.handle, to = %handle, "identity updated");
        self.handle = handle;
        Ok(&self.handle)
    }
}

/// `NODE_` followed by four random characters from `[0-9A-Z]`.
pub fn generate_handle() -> RelayResult<String> {
    let mut suffix = String::with_capacity(SUFFIX_LEN);
    let mut bytes = [0u8; SUFFIX_LEN * 2];

    while suffix.len() < SUFFIX_LEN {
        getrandom::fill(&mut bytes)?;
        let missing = SUFFIX_LEN - suffix.len();
        suffix.extend(suffix_chars(&bytes).take(missing));
    }
    Ok(format!("{HANDLE_PREFIX}{suffix}"))
}

/// Maps random bytes onto the alphabet, dropping bytes at or above
/// [`UNBIASED_LIMIT`] so every character is equally likely.
fn suffix_chars(bytes: &[u8]) -> impl Iterator<Item = char> + '_ {
    bytes
        .iter()
        .filter(|b| **b < UNBIASED_LIMIT)
        .map(|b| SUFFIX_ALPHABET[*b as usize % SUFFIX_ALPHABET.len()] as char)
}

/// Trims and truncates to [`MAX_HANDLE_LEN`] characters. `None` when nothing is left.
pub fn normalize_handle(candidate: &str, uppercase: bool) -> Option<String> {
    let truncated: String = candidate.trim().chars().take(MAX_HANDLE_LEN).collect();
    let handle = truncated.trim_end();
    if handle.is_empty() {
        return None;
    }

    Some(if uppercase { handle.to_uppercase() } else { handle.to_owned() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn is_generated(handle: &str) -> bool {
        handle.len() == HANDLE_PREFIX.len() + SUFFIX_LEN
            && handle.starts_with(HANDLE_PREFIX)
            && handle[HANDLE_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    }

    #[test]
    fn fresh_profile_gets_a_persisted_handle() {
        let store = MemoryStore::new();

        let first = IdentityManager::load_or_create(Arc::new(store.clone()), true).unwrap();
        assert!(is_generated(first.handle()), "unexpected handle {}", first.handle());

        let second = IdentityManager::load_or_create(Arc::new(store.clone()), true).unwrap();
        assert_eq!(first.handle(), second.handle());
        assert_eq!(store.get(IDENTITY_KEY).unwrap().as_deref(), Some(first.handle()));
    }

    #[test]
    fn blank_saved_handle_is_regenerated() {
        let store = MemoryStore::new();
        store.set(IDENTITY_KEY, "   ").unwrap();

        let identity = IdentityManager::load_or_create(Arc::new(store), true).unwrap();
        assert!(is_generated(identity.handle()));
    }

    #[test]
    fn update_trims_truncates_and_persists() {
        let store = MemoryStore::new();
        let mut identity = IdentityManager::load_or_create(Arc::new(store.clone()), true).unwrap();

        let handle = identity.update("  ghost in the machine  ").unwrap().to_owned();
        assert_eq!(handle, "GHOST IN THE MA");
        assert_eq!(store.get(IDENTITY_KEY).unwrap().as_deref(), Some("GHOST IN THE MA"));
    }

    #[test]
    fn blank_update_is_rejected_without_side_effects() {
        let store = MemoryStore::new();
        let mut identity = IdentityManager::load_or_create(Arc::new(store.clone()), true).unwrap();
        let before = identity.handle().to_owned();

        assert!(matches!(identity.update(" \t "), Err(RelayError::Validation(_))));
        assert_eq!(identity.handle(), before);
        assert_eq!(store.get(IDENTITY_KEY).unwrap(), Some(before));
    }

    #[test]
    fn case_is_kept_without_normalization() {
        assert_eq!(normalize_handle("Neo", false).as_deref(), Some("Neo"));
        assert_eq!(normalize_handle("Neo", true).as_deref(), Some("NEO"));
        assert_eq!(normalize_handle("abcdefghijklmn opq", false).as_deref(), Some("abcdefghijklmn"));
    }

    #[test]
    fn suffix_bytes_past_the_last_full_cycle_are_dropped() {
        let chars: String = suffix_chars(&[0, 35, 36, 251, 252, 255]).collect();
        assert_eq!(chars, "0Z0Z");
        assert_eq!(suffix_chars(&[252, 253, 254, 255]).count(), 0);
        assert_eq!(usize::from(UNBIASED_LIMIT) % SUFFIX_ALPHABET.len(), 0);
    }

    #[test]
    fn generated_handles_match_the_pattern() {
        for _ in 0..32 {
            assert!(is_generated(&generate_handle().unwrap()));
        }
    }
}
