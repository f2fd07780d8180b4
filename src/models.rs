use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded outcome of analyzing a student message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IstEvent {
    pub id: String,
    pub course_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "RawSkills::is_absent")]
    pub skills: RawSkills,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisRecord>,
}

impl IstEvent {
    pub fn new(course_id: impl Into<String>, skills: RawSkills) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            course_id: course_id.into(),
            created_at: Utc::now(),
            skills,
            thread_id: None,
            message_id: None,
            uid: None,
            analysis: None,
        }
    }

    /// The upsert key, when the event came from a threaded message
    pub fn key(&self) -> Option<EventKey> {
        match (&self.thread_id, &self.message_id) {
            (Some(thread_id), Some(message_id)) => Some(EventKey {
                thread_id: thread_id.clone(),
                message_id: message_id.clone(),
            }),
            _ => None,
        }
    }
}

/// The loosely typed `skills` field as it arrives from storage.
///
/// Stored data is never trusted: a missing field, a non-array value and an
/// array of mixed values all deserialize successfully and are sorted out by
/// the normalizer later.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<Value>", into = "Option<Value>")]
pub enum RawSkills {
    #[default]
    Absent,
    InvalidShape(Value),
    Sequence(Vec<Value>),
}

impl RawSkills {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawSkills::Sequence(
            labels
                .into_iter()
                .map(|label| Value::String(label.into()))
                .collect(),
        )
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawSkills::Absent)
    }

    /// Entries of a well-formed sequence; anything else reads as empty
    pub fn entries(&self) -> &[Value] {
        match self {
            RawSkills::Sequence(values) => values,
            RawSkills::Absent | RawSkills::InvalidShape(_) => &[],
        }
    }
}

impl From<Option<Value>> for RawSkills {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawSkills::Absent,
            Some(Value::Array(values)) => RawSkills::Sequence(values),
            Some(other) => RawSkills::InvalidShape(other),
        }
    }
}

impl From<RawSkills> for Option<Value> {
    fn from(skills: RawSkills) -> Self {
        match skills {
            RawSkills::Absent => None,
            RawSkills::InvalidShape(value) => Some(value),
            RawSkills::Sequence(values) => Some(Value::Array(values)),
        }
    }
}

/// Composite identity of an analyzed message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub thread_id: String,
    pub message_id: String,
}

impl EventKey {
    pub fn new(thread_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.thread_id, self.message_id)
    }
}

/// Inclusive time window for event queries
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Window ending now. A window reaching past the earliest representable
    /// time is unbounded.
    pub fn last_days(days: i64) -> Self {
        let since = Duration::try_days(days.max(1))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        Self { since, until: None }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| at >= since) && self.until.map_or(true, |until| at <= until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentLabel {
    Greeting,
    EndConversation,
    AskExplanation,
    AskQuestion,
    ProvideAnswer,
    OffTopic,
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub primary: IntentLabel,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillRole {
    Focus,
    Prerequisite,
    Related,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillItem {
    pub id: String,
    pub display_name: String,
    pub confidence: f64,
    pub role: SkillRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedNode {
    pub id: String,
    pub reason: String,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryStatus {
    OnTrack,
    OffTrack,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub current_nodes: Vec<String>,
    pub suggested_next_nodes: Vec<SuggestedNode>,
    pub status: TrajectoryStatus,
}

/// What a classifier returns for one message, before metadata is attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub skills: Vec<SkillItem>,
    pub trajectory: Trajectory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub processed_at: DateTime<Utc>,
    pub model_version: String,
    pub thread_id: String,
    pub message_id: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub intent: Intent,
    pub skills: Vec<SkillItem>,
    pub trajectory: Trajectory,
    pub metadata: AnalysisMetadata,
    /// Set only on fallback records, for display to the student
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl AnalysisRecord {
    pub fn is_fallback(&self) -> bool {
        self.notice.is_some()
    }
}

/// Per-skill figure in a class report; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStat {
    pub skill: String,
    pub count: usize,
    /// Share of all skill assignments (0-1), not share of events
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherClassReport {
    pub course_id: String,
    pub total_events: usize,
    pub events_with_skills: usize,
    pub unique_skills_count: usize,
    pub top_skills: Vec<SkillStat>,
    pub gaps: Vec<SkillStat>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Student,
    Tutor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
