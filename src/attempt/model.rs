use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    TimedOut,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::TimedOut => "timed-out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Mcq,
    StatementBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question_text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<QuestionOption>,
    pub marks: f64,
    #[serde(default)]
    pub selected_option: Option<String>,
    /// Only present for `STATEMENT_BASED` questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statements: Option<Vec<Statement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_instruction: Option<String>,
}

impl Question {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|option| option.id == option_id)
    }

    pub fn is_answered(&self) -> bool {
        self.selected_option.is_some()
    }
}

/// Exam metadata as returned by the rules endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDetails {
    #[serde(default)]
    pub exam_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub total_marks: f64,
    #[serde(default)]
    pub has_access: bool,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub rules: Vec<String>,
}

/// UI-facing state of one attempt. Mutated only through [`crate::attempt::reduce`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptState {
    pub attempt_id: Option<String>,
    pub status: AttemptStatus,
    pub time_remaining_seconds: u64,
    pub current_question_index: usize,
    pub questions: Vec<Question>,
    pub exam_details: Option<ExamDetails>,
    pub loading: bool,
    pub submitting: bool,
    pub error: Option<String>,
}

impl AttemptState {
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question_index)
    }

    pub fn answered_count(&self) -> usize {
        self.questions.iter().filter(|question| question.is_answered()).count()
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }
}
