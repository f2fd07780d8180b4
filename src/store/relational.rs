use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::EventStore;
use crate::error::StorageError;
use crate::models::{AnalysisRecord, EventKey, IstEvent, RawSkills, TimeRange};

const UPSERT_EVENT: &str = r#"
    INSERT INTO ist_events
    (id, course_id, thread_id, message_id, uid, skills, analysis, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (thread_id, message_id) DO UPDATE
    SET course_id = EXCLUDED.course_id,
        uid = EXCLUDED.uid,
        skills = EXCLUDED.skills,
        analysis = EXCLUDED.analysis,
        created_at = EXCLUDED.created_at
"#;

const PRIMARY_KEY: &str = "ist_events_pkey";

const SELECT_COLUMNS: &str =
    "SELECT id, course_id, thread_id, message_id, uid, skills, analysis, created_at \
     FROM ist_events";

/// PostgreSQL backed event store.
///
/// Rows without a thread/message pair never conflict, so plain appends and
/// keyed upserts share one statement.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;

        let store = Self { pool };
        store.init_db().await?;
        Ok(store)
    }

    /// Create or upgrade the schema
    pub async fn init_db(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn write(&self, event: &IstEvent) -> Result<(), StorageError> {
        let skills: Option<Value> = event.skills.clone().into();
        let analysis = event
            .analysis
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(UPSERT_EVENT)
            .bind(&event.id)
            .bind(&event.course_id)
            .bind(&event.thread_id)
            .bind(&event.message_id)
            .bind(&event.uid)
            .bind(skills)
            .bind(analysis)
            .bind(event.created_at)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                let duplicate_id = err.as_database_error().is_some_and(|db| {
                    db.is_unique_violation() && db.constraint() == Some(PRIMARY_KEY)
                });
                if duplicate_id {
                    StorageError::DuplicateId(event.id.clone())
                } else {
                    StorageError::Database(err)
                }
            })?;
        Ok(())
    }
}

/// SQL for one course's events plus the time bounds to bind after `$1`
fn course_query(range: TimeRange) -> (String, Vec<DateTime<Utc>>) {
    let mut query = format!("{SELECT_COLUMNS} WHERE course_id = $1");
    let mut bounds: Vec<DateTime<Utc>> = Vec::new();

    if let Some(since) = range.since {
        bounds.push(since);
        query.push_str(&format!(" AND created_at >= ${}", bounds.len() + 1));
    }
    if let Some(until) = range.until {
        bounds.push(until);
        query.push_str(&format!(" AND created_at <= ${}", bounds.len() + 1));
    }
    query.push_str(" ORDER BY created_at ASC");

    (query, bounds)
}

fn row_to_event(row: &PgRow) -> Result<IstEvent, StorageError> {
    let skills: Option<Value> = row.try_get("skills")?;
    let analysis: Option<Value> = row.try_get("analysis")?;
    let analysis = analysis
        .map(serde_json::from_value::<AnalysisRecord>)
        .transpose()?;

    Ok(IstEvent {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        created_at: row.try_get("created_at")?,
        skills: RawSkills::from(skills),
        thread_id: row.try_get("thread_id")?,
        message_id: row.try_get("message_id")?,
        uid: row.try_get("uid")?,
        analysis,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append_event(&self, event: &IstEvent) -> Result<(), StorageError> {
        self.write(event).await
    }

    async fn upsert_event(&self, key: &EventKey, event: &IstEvent) -> Result<(), StorageError> {
        let mut keyed = event.clone();
        keyed.thread_id = Some(key.thread_id.clone());
        keyed.message_id = Some(key.message_id.clone());
        self.write(&keyed).await
    }

    async fn query_events(
        &self,
        course_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<IstEvent>, StorageError> {
        let (query, bounds) = course_query(range.unwrap_or_default());
        let mut rows = sqlx::query(&query).bind(course_id);
        for bound in bounds {
            rows = rows.bind(bound);
        }

        let records = rows.fetch_all(&self.pool).await?;
        let mut events = Vec::with_capacity(records.len());
        for row in records.iter() {
            events.push(row_to_event(row)?);
        }

        debug!(course_id, count = events.len(), "queried IST events");
        Ok(events)
    }

    async fn get_event(&self, key: &EventKey) -> Result<Option<IstEvent>, StorageError> {
        let query = format!("{SELECT_COLUMNS} WHERE thread_id = $1 AND message_id = $2");
        let row = sqlx::query(&query)
            .bind(&key.thread_id)
            .bind(&key.message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn count_events(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM ist_events")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as u64)
    }
}
