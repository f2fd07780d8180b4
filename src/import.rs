use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::models::{EventKey, IstEvent, RawSkills};
use crate::store::EventStore;

pub const SEED_COURSE: &str = "stats-101";

/// Load realistic demo events. Re-running overwrites the same records.
pub async fn seed(store: &dyn EventStore) -> anyhow::Result<usize> {
    let events = vec![
        ("seed-001", vec!["Bayes Theorem", "Probability"], (2026, 1, 26)),
        ("seed-002", vec!["bayes   theorem"], (2026, 1, 27)),
        ("seed-003", vec!["Conditional Probability", "Probability"], (2026, 1, 28)),
        ("seed-004", vec!["Random Variables"], (2026, 1, 29)),
        ("seed-005", vec!["Probability", "Variance"], (2026, 1, 30)),
        ("seed-006", vec!["???"], (2026, 2, 2)),
        ("seed-007", vec![], (2026, 2, 3)),
    ];

    let mut written = 0usize;
    for (message_id, skills, (year, month, day)) in events {
        let created_at = Utc
            .with_ymd_and_hms(year, month, day, 15, 0, 0)
            .single()
            .context("invalid seed date")?;
        let key = EventKey::new("seed-thread", message_id);

        let mut event = IstEvent::new(SEED_COURSE, RawSkills::from_labels(skills));
        event.created_at = created_at;
        event.uid = Some("seed-student".to_string());

        store
            .upsert_event(&key, &event)
            .await
            .with_context(|| format!("failed to write seed event {key}"))?;
        written += 1;
    }

    Ok(written)
}

/// Import events from a CSV file with columns
/// `course_id,created_at,skills,thread_id,message_id`.
///
/// `skills` is a `;`-separated list. Rows carrying both a thread and a
/// message id are upserted under that key.
pub async fn import_csv(store: &dyn EventStore, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(Deserialize)]
    struct CsvRow {
        course_id: String,
        created_at: DateTime<Utc>,
        #[serde(default)]
        skills: String,
        thread_id: Option<String>,
        message_id: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", index + 1))?;

        let labels: Vec<&str> = row
            .skills
            .split(';')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .collect();
        let mut event = IstEvent::new(row.course_id, RawSkills::from_labels(labels));
        event.created_at = row.created_at;

        match (row.thread_id, row.message_id) {
            (Some(thread_id), Some(message_id)) => {
                let key = EventKey::new(thread_id, message_id);
                store.upsert_event(&key, &event).await?;
            }
            _ => store.append_event(&event).await?,
        }
        imported += 1;
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{compute_report, ReportOptions};
    use crate::store::LocalEventStore;
    use std::io::Write;

    #[tokio::test]
    async fn seed_is_idempotent() {
        let store = LocalEventStore::in_memory();
        assert_eq!(seed(&store).await.unwrap(), 7);
        seed(&store).await.unwrap();
        assert_eq!(store.count_events().await.unwrap(), 7);

        let events = store.query_events(SEED_COURSE, None).await.unwrap();
        let report = compute_report(&events, SEED_COURSE, ReportOptions::default());
        assert_eq!(report.total_events, 7);
        assert_eq!(report.events_with_skills, 5);
        assert_eq!(report.top_skills[0].skill, "probability");
        assert_eq!(report.top_skills[0].count, 3);
    }

    #[tokio::test]
    async fn imports_rows_and_upserts_keyed_ones() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "course_id,created_at,skills,thread_id,message_id").unwrap();
        writeln!(file, "c1,2026-01-10T09:00:00Z,Sets; Logic,t1,m1").unwrap();
        writeln!(file, "c1,2026-01-11T09:00:00Z,Logic,t1,m1").unwrap();
        writeln!(file, "c1,2026-01-12T09:00:00Z,Probability,,").unwrap();
        writeln!(file, "c2,2026-01-12T09:00:00Z,,,").unwrap();
        file.flush().unwrap();

        let store = LocalEventStore::in_memory();
        let imported = import_csv(&store, file.path()).await.unwrap();
        assert_eq!(imported, 4);
        assert_eq!(store.count_events().await.unwrap(), 3);

        let keyed = store
            .get_event(&EventKey::new("t1", "m1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(keyed.skills, RawSkills::from_labels(["Logic"]));

        let other = store.query_events("c2", None).await.unwrap();
        assert_eq!(other[0].skills, RawSkills::Sequence(Vec::new()));
    }

    #[tokio::test]
    async fn bad_timestamp_names_the_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "course_id,created_at,skills,thread_id,message_id").unwrap();
        writeln!(file, "c1,yesterday,Sets,,").unwrap();
        file.flush().unwrap();

        let store = LocalEventStore::in_memory();
        let err = import_csv(&store, file.path()).await.unwrap_err();
        assert!(err.to_string().contains("invalid CSV row 1"));
    }
}
