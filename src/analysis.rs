//! Turns a student message into an analysis record and stores it as an IST event

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::DEFAULT_MODEL_VERSION;
use crate::error::{ClassifierError, IstError, StorageError};
use crate::models::{
    AnalysisMetadata, AnalysisRecord, Classification, EventKey, Intent, IntentLabel, IstEvent,
    RawSkills, SkillItem, SkillRole, SuggestedNode, Trajectory, TrajectoryStatus,
};
use crate::store::EventStore;

/// Course id recorded for messages analyzed without a course
pub const UNSCOPED_COURSE: &str = "unscoped";
pub const FALLBACK_MODEL_VERSION: &str = "fallback";
pub const FALLBACK_NOTICE: &str = "The AI tutor is temporarily unavailable because the upstream \
     model is overloaded. Your question was received; please try again in a bit.";

/// External message classifier
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        message_text: &str,
        course_context: Option<&str>,
    ) -> Result<Classification, ClassifierError>;
}

/// Classifier that answers every message with the same explanation request
/// about Bayes' theorem. Used until a model-backed classifier is wired in.
pub struct CannedClassifier;

#[async_trait]
impl Classifier for CannedClassifier {
    async fn classify(
        &self,
        _message_text: &str,
        _course_context: Option<&str>,
    ) -> Result<Classification, ClassifierError> {
        Ok(Classification {
            intent: Intent {
                primary: IntentLabel::AskExplanation,
                confidence: 0.95,
            },
            skills: vec![
                SkillItem {
                    id: "bayes-theorem".into(),
                    display_name: "Bayes Theorem".into(),
                    confidence: 0.9,
                    role: SkillRole::Focus,
                },
                SkillItem {
                    id: "probability".into(),
                    display_name: "Probability".into(),
                    confidence: 0.98,
                    role: SkillRole::Prerequisite,
                },
            ],
            trajectory: Trajectory {
                current_nodes: vec!["introduction-to-probability".into()],
                suggested_next_nodes: vec![SuggestedNode {
                    id: "bayes-theorem-explained".into(),
                    reason: "The user is asking a direct question about this topic.".into(),
                    priority: 1,
                }],
                status: TrajectoryStatus::OnTrack,
            },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    pub thread_id: String,
    pub message_text: String,
    pub message_id: Option<String>,
    pub course_id: Option<String>,
    pub course_context: Option<String>,
}

/// What happened to the event after classification
#[derive(Debug)]
pub enum Persistence {
    Stored,
    /// Fallback records are never written
    Skipped,
    Failed(StorageError),
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub record: AnalysisRecord,
    pub persistence: Persistence,
}

struct Prepared {
    uid: String,
    key: EventKey,
    message_text: String,
    course_id: String,
    course_context: Option<String>,
}

pub struct Analyzer {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn EventStore>,
    timeout: Duration,
    model_version: String,
}

impl Analyzer {
    pub fn new(classifier: Arc<dyn Classifier>, store: Arc<dyn EventStore>) -> Self {
        Self {
            classifier,
            store,
            timeout: Duration::from_secs(30),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model_version(mut self, model_version: impl Into<String>) -> Self {
        self.model_version = model_version.into();
        self
    }

    /// Classify one message for an authenticated caller and record the result.
    ///
    /// Transient classifier failures yield a fallback record instead of an
    /// error. Persistence is best effort: its result is reported in
    /// [`AnalysisOutcome::persistence`] and never changes the record.
    pub async fn analyze(
        &self,
        uid: Option<&str>,
        request: AnalyzeRequest,
    ) -> Result<AnalysisOutcome, IstError> {
        let prepared = prepare(uid, request)?;

        match self.classify_and_store(&prepared).await {
            Err(IstError::UpstreamUnavailable(reason)) => {
                warn!(key = %prepared.key, %reason, "classifier unavailable, returning fallback");
                Ok(AnalysisOutcome {
                    record: fallback_record(&prepared),
                    persistence: Persistence::Skipped,
                })
            }
            other => other,
        }
    }

    async fn classify_and_store(&self, prepared: &Prepared) -> Result<AnalysisOutcome, IstError> {
        let classification = self.classify(prepared).await.map_err(|err| {
            if err.is_transient() {
                IstError::UpstreamUnavailable(err.to_string())
            } else {
                IstError::Classifier(err)
            }
        })?;

        let record = AnalysisRecord {
            intent: classification.intent,
            skills: classification.skills,
            trajectory: classification.trajectory,
            metadata: AnalysisMetadata {
                processed_at: Utc::now(),
                model_version: self.model_version.clone(),
                thread_id: prepared.key.thread_id.clone(),
                message_id: prepared.key.message_id.clone(),
                uid: prepared.uid.clone(),
            },
            notice: None,
        };

        let event = IstEvent {
            id: Uuid::new_v4().to_string(),
            course_id: prepared.course_id.clone(),
            created_at: record.metadata.processed_at,
            skills: RawSkills::from_labels(record.skills.iter().map(|s| s.display_name.clone())),
            thread_id: Some(prepared.key.thread_id.clone()),
            message_id: Some(prepared.key.message_id.clone()),
            uid: Some(prepared.uid.clone()),
            analysis: Some(record.clone()),
        };

        let persistence = match self.store.upsert_event(&prepared.key, &event).await {
            Ok(()) => {
                debug!(key = %prepared.key, course_id = %event.course_id, "stored IST event");
                Persistence::Stored
            }
            Err(err) => {
                error!(key = %prepared.key, error = %err, "failed to store IST event");
                Persistence::Failed(err)
            }
        };

        Ok(AnalysisOutcome {
            record,
            persistence,
        })
    }

    async fn classify(&self, prepared: &Prepared) -> Result<Classification, ClassifierError> {
        let call = self
            .classifier
            .classify(&prepared.message_text, prepared.course_context.as_deref());

        let classification = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(ClassifierError::TimedOut(self.timeout.as_millis() as u64)),
        };
        validate(&classification)?;
        Ok(classification)
    }
}

fn prepare(uid: Option<&str>, request: AnalyzeRequest) -> Result<Prepared, IstError> {
    let uid = uid
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| {
            IstError::Unauthenticated("user must be authenticated to analyze messages".into())
        })?;

    if request.thread_id.trim().is_empty() || request.message_text.trim().is_empty() {
        return Err(IstError::InvalidArgument(
            "threadId and messageText are required".into(),
        ));
    }

    let message_id = request
        .message_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("auto-{}", Uuid::new_v4()));
    let course_id = request
        .course_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| UNSCOPED_COURSE.to_string());

    Ok(Prepared {
        uid: uid.to_string(),
        key: EventKey::new(request.thread_id, message_id),
        message_text: request.message_text,
        course_id,
        course_context: request.course_context,
    })
}

fn validate(classification: &Classification) -> Result<(), ClassifierError> {
    let in_unit = |value: f64| value.is_finite() && (0.0..=1.0).contains(&value);

    if !in_unit(classification.intent.confidence) {
        return Err(ClassifierError::InvalidOutput(format!(
            "intent confidence {} outside [0, 1]",
            classification.intent.confidence
        )));
    }
    for skill in &classification.skills {
        if !in_unit(skill.confidence) {
            return Err(ClassifierError::InvalidOutput(format!(
                "confidence {} for skill {} outside [0, 1]",
                skill.confidence, skill.id
            )));
        }
    }
    Ok(())
}

fn fallback_record(prepared: &Prepared) -> AnalysisRecord {
    AnalysisRecord {
        intent: Intent {
            primary: IntentLabel::Unclassified,
            confidence: 0.0,
        },
        skills: Vec::new(),
        trajectory: Trajectory {
            current_nodes: Vec::new(),
            suggested_next_nodes: Vec::new(),
            status: TrajectoryStatus::Neutral,
        },
        metadata: AnalysisMetadata {
            processed_at: Utc::now(),
            model_version: FALLBACK_MODEL_VERSION.to_string(),
            thread_id: prepared.key.thread_id.clone(),
            message_id: prepared.key.message_id.clone(),
            uid: prepared.uid.clone(),
        },
        notice: Some(FALLBACK_NOTICE.to_string()),
    }
}
