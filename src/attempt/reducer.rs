use super::model::{AttemptState, AttemptStatus, ExamDetails, Question};

/// Every way the attempt state is allowed to change.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptAction {
    StartAttempt { attempt_id: String, time_remaining: i64 },
    SetQuestions(Vec<Question>),
    SetExamDetails(ExamDetails),
    /// The index must already be clamped by the caller.
    NavigateTo(usize),
    SaveAnswer { question_id: String, selected_option: Option<String> },
    Tick(i64),
    SetLoading(bool),
    SetSubmitting(bool),
    SetError(String),
    Completed,
    Cleanup,
}

/// Pure transition function for [`AttemptState`].
pub fn reduce(mut state: AttemptState, action: AttemptAction) -> AttemptState {
    match action {
        AttemptAction::StartAttempt { attempt_id, time_remaining } => {
            state.attempt_id = Some(attempt_id);
            state.status = AttemptStatus::InProgress;
            state.time_remaining_seconds = clamp_seconds(time_remaining);
        }
        AttemptAction::SetQuestions(questions) => {
            state.questions = questions;
        }
        AttemptAction::SetExamDetails(details) => {
            state.exam_details = Some(details);
        }
        AttemptAction::NavigateTo(index) => {
            state.current_question_index = index;
        }
        AttemptAction::SaveAnswer { question_id, selected_option } => {
            if let Some(question) =
                state.questions.iter_mut().find(|question| question.id == question_id)
            {
                match selected_option {
                    Some(option_id) if !question.has_option(&option_id) => {
                        tracing::debug!(
                            question_id = %question.id,
                            option_id = %option_id,
                            "Ignoring answer for unknown option"
                        );
                    }
                    selected => question.selected_option = selected,
                }
            }
        }
        AttemptAction::Tick(time_remaining) => {
            state.time_remaining_seconds = clamp_seconds(time_remaining);
            // Expiry wins even while a submission is in flight.
            if time_remaining <= 0 {
                state.status = AttemptStatus::TimedOut;
            }
        }
        AttemptAction::SetLoading(loading) => {
            state.loading = loading;
        }
        AttemptAction::SetSubmitting(submitting) => {
            state.submitting = submitting;
        }
        AttemptAction::SetError(message) => {
            state.error = Some(message);
            state.loading = false;
            state.submitting = false;
        }
        AttemptAction::Completed => {
            state.submitting = false;
            if state.status != AttemptStatus::TimedOut {
                state.status = AttemptStatus::Completed;
            }
        }
        AttemptAction::Cleanup => {
            state.submitting = false;
            state.error = None;
        }
    }

    state
}

fn clamp_seconds(value: i64) -> u64 {
    value.max(0) as u64
}
