use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::EventStore;
use crate::error::StorageError;
use crate::models::{EventKey, IstEvent, TimeRange};

/// Event store kept in memory and mirrored to a JSON array on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, holding the lock for the duration, so writers never interleave.
pub struct LocalEventStore {
    path: Option<PathBuf>,
    events: Mutex<Vec<IstEvent>>,
}

impl LocalEventStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Load events from `path`; a missing file starts an empty store.
    pub async fn open(path: Option<PathBuf>) -> Result<Self, StorageError> {
        let events = match &path {
            Some(path) => load(path).await?,
            None => Vec::new(),
        };
        Ok(Self {
            path,
            events: Mutex::new(events),
        })
    }

    async fn persist(&self, events: &[IstEvent]) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(events)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    async fn write_with<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Vec<IstEvent>) -> Result<(), StorageError>,
    {
        let mut events = self.events.lock().await;
        let mut next = events.clone();
        change(&mut next)?;
        self.persist(&next).await?;
        *events = next;
        Ok(())
    }
}

async fn load(path: &Path) -> Result<Vec<IstEvent>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let events: Vec<IstEvent> = serde_json::from_slice(&bytes)?;
    debug!(path = %path.display(), count = events.len(), "loaded IST events");
    Ok(events)
}

/// Add a new record, refusing an id that is already stored.
fn insert(events: &mut Vec<IstEvent>, event: IstEvent) -> Result<(), StorageError> {
    if events.iter().any(|existing| existing.id == event.id) {
        return Err(StorageError::DuplicateId(event.id));
    }
    events.push(event);
    Ok(())
}

fn put(
    events: &mut Vec<IstEvent>,
    key: &EventKey,
    mut event: IstEvent,
) -> Result<(), StorageError> {
    event.thread_id = Some(key.thread_id.clone());
    event.message_id = Some(key.message_id.clone());

    match events
        .iter_mut()
        .find(|existing| existing.key().as_ref() == Some(key))
    {
        Some(existing) => {
            // The first stored id stays stable across overwrites.
            event.id = existing.id.clone();
            *existing = event;
            Ok(())
        }
        None => insert(events, event),
    }
}

#[async_trait]
impl EventStore for LocalEventStore {
    async fn append_event(&self, event: &IstEvent) -> Result<(), StorageError> {
        let event = event.clone();
        self.write_with(move |events| match event.key() {
            Some(key) => put(events, &key, event),
            None => insert(events, event),
        })
        .await
    }

    async fn upsert_event(&self, key: &EventKey, event: &IstEvent) -> Result<(), StorageError> {
        let event = event.clone();
        self.write_with(move |events| put(events, key, event)).await
    }

    async fn query_events(
        &self,
        course_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<IstEvent>, StorageError> {
        let range = range.unwrap_or_default();
        let events = self.events.lock().await;
        let mut matching: Vec<IstEvent> = events
            .iter()
            .filter(|event| event.course_id == course_id && range.contains(event.created_at))
            .cloned()
            .collect();
        matching.sort_by_key(|event| event.created_at);
        debug!(course_id, count = matching.len(), "queried IST events");
        Ok(matching)
    }

    async fn get_event(&self, key: &EventKey) -> Result<Option<IstEvent>, StorageError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .find(|event| event.key().as_ref() == Some(key))
            .cloned())
    }

    async fn count_events(&self) -> Result<u64, StorageError> {
        Ok(self.events.lock().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSkills;
    use chrono::{Duration, Utc};

    fn keyed(course_id: &str, thread: &str, message: &str, skills: &[&str]) -> IstEvent {
        let mut event = IstEvent::new(course_id, RawSkills::from_labels(skills.iter().copied()));
        event.thread_id = Some(thread.to_string());
        event.message_id = Some(message.to_string());
        event
    }

    #[tokio::test]
    async fn upsert_overwrites_same_key() {
        let store = LocalEventStore::in_memory();
        let key = EventKey::new("t1", "m1");

        store
            .upsert_event(&key, &keyed("c1", "t1", "m1", &["Probability"]))
            .await
            .unwrap();
        store
            .upsert_event(&key, &keyed("c1", "t1", "m1", &["Variance"]))
            .await
            .unwrap();

        assert_eq!(store.count_events().await.unwrap(), 1);
        let stored = store.get_event(&key).await.unwrap().unwrap();
        assert_eq!(stored.skills, RawSkills::from_labels(["Variance"]));
    }

    #[tokio::test]
    async fn upsert_keeps_first_id() {
        let store = LocalEventStore::in_memory();
        let key = EventKey::new("t1", "m1");
        let first = keyed("c1", "t1", "m1", &[]);
        store.upsert_event(&key, &first).await.unwrap();
        store
            .upsert_event(&key, &keyed("c1", "t1", "m1", &["Sets"]))
            .await
            .unwrap();

        let stored = store.get_event(&key).await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn append_without_key_never_merges() {
        let store = LocalEventStore::in_memory();
        store
            .append_event(&IstEvent::new("c1", RawSkills::Absent))
            .await
            .unwrap();
        store
            .append_event(&IstEvent::new("c1", RawSkills::Absent))
            .await
            .unwrap();
        assert_eq!(store.count_events().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn append_rejects_reused_id() {
        let store = LocalEventStore::in_memory();
        let event = IstEvent::new("c1", RawSkills::Absent);
        store.append_event(&event).await.unwrap();

        let err = store.append_event(&event).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(ref id) if *id == event.id));

        let mut keyed_copy = event.clone();
        keyed_copy.thread_id = Some("t1".into());
        keyed_copy.message_id = Some("m1".into());
        let err = store.append_event(&keyed_copy).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(_)));

        let ids: Vec<String> = store
            .query_events("c1", None)
            .await
            .unwrap()
            .into_iter()
            .map(|stored| stored.id)
            .collect();
        assert_eq!(ids, vec![event.id]);
    }

    #[tokio::test]
    async fn append_with_key_behaves_as_upsert() {
        let store = LocalEventStore::in_memory();
        store.append_event(&keyed("c1", "t1", "m1", &["a"])).await.unwrap();
        store.append_event(&keyed("c1", "t1", "m1", &["b"])).await.unwrap();
        store.append_event(&keyed("c1", "t1", "m2", &["c"])).await.unwrap();
        assert_eq!(store.count_events().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_scopes_by_course_and_range() {
        let store = LocalEventStore::in_memory();
        let now = Utc::now();

        let mut old = IstEvent::new("c1", RawSkills::Absent);
        old.created_at = now - Duration::days(40);
        let mut recent = IstEvent::new("c1", RawSkills::Absent);
        recent.created_at = now - Duration::days(2);
        let other = IstEvent::new("c2", RawSkills::Absent);

        for event in [&recent, &old, &other] {
            store.append_event(event).await.unwrap();
        }

        let all = store.query_events("c1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, old.id);

        let window = TimeRange {
            since: Some(now - Duration::days(30)),
            until: None,
        };
        let windowed = store.query_events("c1", Some(window)).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, recent.id);

        assert!(store.query_events("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.json");

        let store = LocalEventStore::open(Some(path.clone())).await.unwrap();
        store
            .upsert_event(&EventKey::new("t1", "m1"), &keyed("c1", "t1", "m1", &["Sets"]))
            .await
            .unwrap();
        drop(store);

        let reopened = LocalEventStore::open(Some(path.clone())).await.unwrap();
        let events = reopened.query_events("c1", None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].skills, RawSkills::from_labels(["Sets"]));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn reads_loose_json_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "e1", "courseId": "c1", "createdAt": "2026-01-10T09:00:00Z", "skills": ["Sets", 3]},
                {"id": "e2", "courseId": "c1", "createdAt": "2026-01-11T09:00:00Z", "skills": "Sets"},
                {"id": "e3", "courseId": "c1", "createdAt": "2026-01-12T09:00:00Z"}
            ]"#,
        )
        .unwrap();

        let store = LocalEventStore::open(Some(path)).await.unwrap();
        let events = store.query_events("c1", None).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1].skills, RawSkills::InvalidShape(_)));
    }

    #[tokio::test]
    async fn missing_or_blank_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LocalEventStore::open(Some(dir.path().join("none.json")))
            .await
            .unwrap();
        assert_eq!(missing.count_events().await.unwrap(), 0);

        let blank_path = dir.path().join("blank.json");
        std::fs::write(&blank_path, "\n").unwrap();
        let blank = LocalEventStore::open(Some(blank_path)).await.unwrap();
        assert_eq!(blank.count_events().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_leave_one_record() {
        let store = std::sync::Arc::new(LocalEventStore::in_memory());
        let key = EventKey::new("t1", "m1");

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                let key = key.clone();
                tokio::spawn(async move {
                    let label = format!("skill {i}");
                    let event = keyed("c1", "t1", "m1", &[label.as_str()]);
                    store.upsert_event(&key, &event).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count_events().await.unwrap(), 1);
    }
}
