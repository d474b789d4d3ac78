use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::wizard::WizardController;

pub type Key = String;

/// One wizard session. Handlers lock `controller` only for synchronous
/// transitions.
pub struct Entry {
    pub born: chrono::DateTime<chrono::Utc>,
    // Milliseconds since the store's epoch.
    last_seen: AtomicU64,
    pub controller: Mutex<WizardController>,
}

#[derive(Debug)]
pub enum SessionError {
    NotFound,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "Session not found"),
        }
    }
}

impl std::error::Error for SessionError {}

/// In-memory wizard sessions with an idle timeout.
pub struct Store {
    entries: RwLock<HashMap<Key, Arc<Entry>>>,
    ttl: time::Duration,
    epoch: time::Instant,
}

impl Store {
    pub fn new(ttl: time::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            epoch: time::Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Stores `controller` under a fresh key.
    pub async fn insert(&self, controller: WizardController) -> Key {
        let key = uuid::Uuid::new_v4().to_string();
        let entry = Entry {
            born: chrono::Utc::now(),
            last_seen: AtomicU64::new(self.now_ms()),
            controller: Mutex::new(controller),
        };
        self.entries
            .write()
            .await
            .insert(key.clone(), Arc::new(entry));
        key
    }

    /// Looks up a session and marks it as used.
    pub async fn get(&self, key: &str) -> Result<Arc<Entry>, SessionError> {
        let entries = self.entries.read().await;
        let entry = entries.get(key).ok_or(SessionError::NotFound)?;
        entry.last_seen.store(self.now_ms(), Ordering::Relaxed);
        Ok(entry.clone())
    }

    /// Get the number of sessions in the store.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove a session.
    /// Returns true if the session was removed, false if it didn't exist.
    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drops sessions idle for longer than the ttl.
    /// Returns the number of sessions removed.
    pub async fn garbage_collect(&self) -> usize {
        let now = self.now_ms();
        let ttl = self.ttl.as_millis() as u64;
        let mut entries = self.entries.write().await;
        let initial_count = entries.len();
        entries.retain(|_, entry| {
            now.saturating_sub(entry.last_seen.load(Ordering::Relaxed)) < ttl
        });
        initial_count - entries.len()
    }
}

/// Collects idle sessions every `interval` until `shutdown` is cancelled.
pub async fn collect_garbage(
    store: Arc<Store>,
    interval: time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session garbage collection stopped");
                return;
            }
            _ = ticker.tick() => {
                let removed = store.garbage_collect().await;
                if removed > 0 {
                    debug!("Removed {} idle sessions", removed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepId;
    use crate::test_utils::builtin_catalog;
    use crate::wizard::SessionState;

    fn controller() -> WizardController {
        WizardController::new(Arc::new(builtin_catalog()), "hana")
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = Store::new(time::Duration::from_secs(60));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = Store::new(time::Duration::from_secs(60));
        let key = store.insert(controller()).await;
        assert_eq!(store.len().await, 1);

        let entry = store.get(&key).await.unwrap();
        entry
            .controller
            .lock()
            .await
            .choose(StepId::When, "きょう")
            .unwrap();

        let again = store.get(&key).await.unwrap();
        assert_eq!(
            again.controller.lock().await.state(),
            SessionState::Collecting(StepId::Subject)
        );
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let store = Store::new(time::Duration::from_secs(60));
        let result = store.get("nonexistent").await;
        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_remove_key() {
        let store = Store::new(time::Duration::from_secs(60));
        let key = store.insert(controller()).await;
        assert!(store.remove(&key).await);
        assert!(!store.remove(&key).await);
        assert!(store.get(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_collect_keeps_recently_used() {
        let store = Store::new(time::Duration::from_millis(100));
        let idle = store.insert(controller()).await;
        let busy = store.insert(controller()).await;

        tokio::time::sleep(time::Duration::from_millis(60)).await;
        store.get(&busy).await.unwrap();
        tokio::time::sleep(time::Duration::from_millis(60)).await;

        assert_eq!(store.garbage_collect().await, 1);
        assert!(store.get(&idle).await.is_err());
        assert!(store.get(&busy).await.is_ok());
    }

    #[tokio::test]
    async fn test_collector_stops_on_shutdown() {
        let store = Arc::new(Store::new(time::Duration::from_secs(60)));
        let token = CancellationToken::new();
        let handle = tokio::spawn(collect_garbage(
            store,
            time::Duration::from_millis(10),
            token.clone(),
        ));
        token.cancel();
        tokio::time::timeout(time::Duration::from_secs(1), handle)
            .await
            .expect("collector should stop")
            .unwrap();
    }
}
