//! In-memory model of one student's attempt and the transitions that move it.

mod model;
mod reducer;

pub use model::{
    AttemptState, AttemptStatus, ExamDetails, Question, QuestionOption, QuestionType, Statement,
};
pub use reducer::{reduce, AttemptAction};
