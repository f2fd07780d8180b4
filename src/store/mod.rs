//! Event storage traits and backend selection

mod history;
mod local;
mod relational;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::StorageMode;
use crate::error::StorageError;
use crate::models::{ChatMessage, EventKey, IstEvent, TimeRange};

pub use history::EmptyChatHistory;
pub use local::LocalEventStore;
pub use relational::PgEventStore;

/// Append and query operations over IST events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a new event. An event carrying a thread and message id
    /// replaces any earlier event with the same key.
    async fn append_event(&self, event: &IstEvent) -> Result<(), StorageError>;

    /// Insert or overwrite the single event stored under `key`
    async fn upsert_event(&self, key: &EventKey, event: &IstEvent) -> Result<(), StorageError>;

    /// Events for one course, oldest first
    async fn query_events(
        &self,
        course_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<IstEvent>, StorageError>;

    async fn get_event(&self, key: &EventKey) -> Result<Option<IstEvent>, StorageError>;

    async fn count_events(&self) -> Result<u64, StorageError>;
}

/// Read access to tutoring chat history
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn get_history(&self, thread_id: &str) -> Result<Vec<ChatMessage>, StorageError>;
}

/// Owns the backend chosen at startup and builds it on first use.
///
/// The event store is constructed at most once per provider, even when
/// several tasks ask for it concurrently before it exists.
pub struct StoreProvider {
    mode: StorageMode,
    events: OnceCell<Arc<dyn EventStore>>,
    history: OnceLock<Arc<dyn ChatHistoryStore>>,
}

impl StoreProvider {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            mode,
            events: OnceCell::new(),
            history: OnceLock::new(),
        }
    }

    pub fn mode(&self) -> &StorageMode {
        &self.mode
    }

    pub async fn event_store(&self) -> Result<Arc<dyn EventStore>, StorageError> {
        let store = self
            .events
            .get_or_try_init(|| open_event_store(&self.mode))
            .await?;
        Ok(Arc::clone(store))
    }

    pub fn chat_history(&self) -> Arc<dyn ChatHistoryStore> {
        let history = self
            .history
            .get_or_init(|| Arc::new(EmptyChatHistory) as Arc<dyn ChatHistoryStore>);
        Arc::clone(history)
    }
}

async fn open_event_store(mode: &StorageMode) -> Result<Arc<dyn EventStore>, StorageError> {
    match mode {
        StorageMode::Local { path } => {
            let store = LocalEventStore::open(path.clone()).await?;
            match path {
                Some(path) => info!(path = %path.display(), "using JSON-based IST event storage"),
                None => info!("using in-memory IST event storage"),
            }
            Ok(Arc::new(store))
        }
        StorageMode::Relational {
            database_url,
            max_connections,
        } => {
            let store = PgEventStore::connect(database_url, *max_connections).await?;
            info!(max_connections, "using PostgreSQL IST event storage");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_are_object_safe() {
        fn _takes_boxed(_: Box<dyn EventStore>) {}
        fn _takes_history(_: Box<dyn ChatHistoryStore>) {}
    }

    #[tokio::test]
    async fn repeated_access_reuses_backend() {
        let provider = StoreProvider::new(StorageMode::Local { path: None });
        let first = provider.event_store().await.unwrap();
        let second = provider.event_store().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_builds_one_backend() {
        let provider = Arc::new(StoreProvider::new(StorageMode::Local { path: None }));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.event_store().await.unwrap() })
            })
            .collect();

        let mut stores = Vec::new();
        for handle in handles {
            stores.push(handle.await.unwrap());
        }
        assert!(stores.iter().all(|store| Arc::ptr_eq(store, &stores[0])));
    }

    #[tokio::test]
    async fn writes_through_one_handle_are_visible_through_another() {
        let provider = StoreProvider::new(StorageMode::Local { path: None });
        let writer = provider.event_store().await.unwrap();
        writer
            .append_event(&IstEvent::new("c1", crate::models::RawSkills::Absent))
            .await
            .unwrap();

        let reader = provider.event_store().await.unwrap();
        assert_eq!(reader.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_local_file_surfaces_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, "{ not an array").unwrap();

        let provider = StoreProvider::new(StorageMode::Local { path: Some(path) });
        let err = provider.event_store().await.err().unwrap();
        assert!(matches!(err, StorageError::Malformed(_)));
    }

    #[tokio::test]
    async fn chat_history_is_shared_and_empty() {
        let provider = StoreProvider::new(StorageMode::Local { path: None });
        let first = provider.chat_history();
        let second = provider.chat_history();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.get_history("thread-1").await.unwrap().is_empty());
    }
}
