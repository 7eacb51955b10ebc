mod identity;
mod ids;
pub mod mirror;
mod progress;
mod quiz;

pub use identity::Identity;
pub use ids::{AttemptId, ModuleId, ParseIdError, QuizId, UserId};
pub use mirror::{MIRROR_SCHEMA_VERSION, MirrorSchemaError, ProgressMirrorEntry, QuizMirrorEntry};
pub use progress::{ProgressDelta, ProgressError, ProgressRecord};
pub use quiz::{
    AnswerValue, CompletionSummary, MAX_QUIZ_QUESTIONS, QuizAnswer, QuizAttempt, QuizCompletion,
    QuizError, RecordOutcome,
};
