use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The exam backend answers either with the payload itself or wrapped in a
/// `data` field. When a `data` key is present only its content is decoded.
pub(crate) fn unwrap_envelope<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let mut value: Value = serde_json::from_str(text)?;
    if let Some(data) = value.as_object_mut().and_then(|object| object.remove("data")) {
        return serde_json::from_value(data);
    }
    serde_json::from_value(value)
}

/// Error body returned by the exam backend.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

impl ErrorBody {
    pub(crate) fn into_message(self) -> Option<String> {
        self.message.or(self.error).filter(|message| !message.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAttempt {
    pub attempt_id: String,
}

/// Server-side view of an attempt. `time_remaining` is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    #[serde(default)]
    pub attempt_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub time_remaining: i64,
    #[serde(default)]
    pub current_question_index: Option<usize>,
    #[serde(default)]
    pub answered_questions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAnswerRequest {
    pub selected_option: Option<String>,
    /// Seconds the question was on screen before answering.
    pub response_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTimeRequest {
    pub time_remaining: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: String,
    #[serde(default)]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub correct_option: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub marks_awarded: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    #[serde(default)]
    pub attempt_id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub total_marks: f64,
    #[serde(default)]
    pub correct_answers: u32,
    #[serde(default)]
    pub incorrect_answers: u32,
    #[serde(default)]
    pub unanswered: u32,
    #[serde(default)]
    pub questions: Vec<QuestionOutcome>,
}
