use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("code registry unavailable: {0}")]
    Unavailable(String),
}

/// A code whose time-to-live ran out, with the transfer it pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapsedCode {
    pub code: String,
    pub transfer_id: String,
}

/// Maps pickup codes to transfer ids for a bounded time.
///
/// A missing key means "never existed or lapsed"; the two cases are not
/// distinguishable through `get`. Each operation is atomic per key.
#[async_trait]
pub trait CodeRegistry: Send + Sync {
    /// Unconditionally maps `code`, replacing any active mapping.
    async fn set(&self, code: &str, transfer_id: &str, ttl: Duration) -> Result<(), RegistryError>;

    /// Maps `code` only when no active mapping exists. Returns whether it did.
    async fn insert_if_absent(
        &self,
        code: &str,
        transfer_id: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError>;

    async fn get(&self, code: &str) -> Result<Option<String>, RegistryError>;

    /// Removes `code`. Returns whether an active mapping was removed.
    async fn delete(&self, code: &str) -> Result<bool, RegistryError>;

    /// Drops lapsed entries and reports each one exactly once.
    async fn purge_expired(&self) -> Result<Vec<LapsedCode>, RegistryError>;

    /// Returns purged lapses the caller failed to process; the next
    /// `purge_expired` reports them again.
    async fn requeue_lapsed(&self, lapsed: Vec<LapsedCode>) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone)]
struct CodeEntry {
    transfer_id: String,
    expires_at: Instant,
}

impl CodeEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, CodeEntry>,
    // Lapsed entries displaced by a newer mapping before a purge saw them.
    displaced: Vec<LapsedCode>,
}

impl RegistryState {
    fn replace(&mut self, code: &str, entry: CodeEntry, now: Instant) {
        if let Some(previous) = self.entries.insert(code.to_string(), entry) {
            if !previous.is_live(now) {
                self.displaced.push(LapsedCode {
                    code: code.to_string(),
                    transfer_id: previous.transfer_id,
                });
            }
        }
    }
}

/// Process-local registry on `tokio::time`, so paused-clock tests can
/// advance past a TTL.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCodeRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemoryCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn active_len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state.entries.values().filter(|entry| entry.is_live(now)).count()
    }
}

#[async_trait]
impl CodeRegistry for InMemoryCodeRegistry {
    async fn set(&self, code: &str, transfer_id: &str, ttl: Duration) -> Result<(), RegistryError> {
        let now = Instant::now();
        let entry = CodeEntry {
            transfer_id: transfer_id.to_string(),
            expires_at: now + ttl,
        };
        self.state.lock().await.replace(code, entry, now);
        debug!(code = %code, transfer_id = %transfer_id, ttl_secs = ttl.as_secs(), "pickup code set");
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        code: &str,
        transfer_id: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if state
            .entries
            .get(code)
            .is_some_and(|existing| existing.is_live(now))
        {
            return Ok(false);
        }

        let entry = CodeEntry {
            transfer_id: transfer_id.to_string(),
            expires_at: now + ttl,
        };
        state.replace(code, entry, now);
        debug!(code = %code, transfer_id = %transfer_id, ttl_secs = ttl.as_secs(), "pickup code registered");
        Ok(true)
    }

    async fn get(&self, code: &str) -> Result<Option<String>, RegistryError> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .entries
            .get(code)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.transfer_id.clone()))
    }

    async fn delete(&self, code: &str) -> Result<bool, RegistryError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.entries.remove(code) {
            Some(entry) if entry.is_live(now) => Ok(true),
            Some(entry) => {
                state.displaced.push(LapsedCode {
                    code: code.to_string(),
                    transfer_id: entry.transfer_id,
                });
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<Vec<LapsedCode>, RegistryError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut lapsed = std::mem::take(&mut state.displaced);
        state.entries.retain(|code, entry| {
            if entry.is_live(now) {
                true
            } else {
                lapsed.push(LapsedCode {
                    code: code.clone(),
                    transfer_id: entry.transfer_id.clone(),
                });
                false
            }
        });
        Ok(lapsed)
    }

    async fn requeue_lapsed(&self, lapsed: Vec<LapsedCode>) -> Result<(), RegistryError> {
        if !lapsed.is_empty() {
            debug!(count = lapsed.len(), "lapsed pickup codes requeued");
            self.state.lock().await.displaced.extend(lapsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn entries_vanish_after_ttl() {
        let registry = InMemoryCodeRegistry::new();
        registry.set("123456", "t-1", MINUTE).await.unwrap();
        assert_eq!(registry.get("123456").await.unwrap().as_deref(), Some("t-1"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.get("123456").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.get("123456").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_code_is_absent() {
        let registry = InMemoryCodeRegistry::new();
        assert!(registry.get("000000").await.unwrap().is_none());
        assert!(!registry.delete("000000").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn insert_if_absent_respects_live_entries_only() {
        let registry = InMemoryCodeRegistry::new();
        assert!(registry.insert_if_absent("111111", "a", MINUTE).await.unwrap());
        assert!(!registry.insert_if_absent("111111", "b", MINUTE).await.unwrap());
        assert_eq!(registry.get("111111").await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(MINUTE).await;
        assert!(registry.insert_if_absent("111111", "b", MINUTE).await.unwrap());
        assert_eq!(registry.get("111111").await.unwrap().as_deref(), Some("b"));

        // The displaced lapsed entry is still reported.
        assert_eq!(
            registry.purge_expired().await.unwrap(),
            vec![LapsedCode {
                code: "111111".to_string(),
                transfer_id: "a".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn set_overwrites_active_mapping() {
        let registry = InMemoryCodeRegistry::new();
        registry.set("222222", "first", MINUTE).await.unwrap();
        registry.set("222222", "second", MINUTE).await.unwrap();
        assert_eq!(registry.get("222222").await.unwrap().as_deref(), Some("second"));
        assert_eq!(registry.active_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_reports_each_lapse_once() {
        let registry = InMemoryCodeRegistry::new();
        registry.set("333333", "short", MINUTE).await.unwrap();
        registry.set("444444", "long", MINUTE * 10).await.unwrap();

        tokio::time::advance(MINUTE * 2).await;
        let lapsed = registry.purge_expired().await.unwrap();
        assert_eq!(
            lapsed,
            vec![LapsedCode {
                code: "333333".to_string(),
                transfer_id: "short".to_string()
            }]
        );
        assert!(registry.purge_expired().await.unwrap().is_empty());
        assert_eq!(registry.active_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_lapses_are_reported_again() {
        let registry = InMemoryCodeRegistry::new();
        registry.set("555555", "t-5", MINUTE).await.unwrap();

        tokio::time::advance(MINUTE * 2).await;
        let lapsed = registry.purge_expired().await.unwrap();
        assert_eq!(lapsed.len(), 1);

        registry.requeue_lapsed(lapsed.clone()).await.unwrap();
        assert_eq!(registry.purge_expired().await.unwrap(), lapsed);
        assert!(registry.purge_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_live_entry() {
        let registry = InMemoryCodeRegistry::new();
        registry.set("555555", "t", MINUTE).await.unwrap();
        assert!(registry.delete("555555").await.unwrap());
        assert!(registry.get("555555").await.unwrap().is_none());
    }
}
