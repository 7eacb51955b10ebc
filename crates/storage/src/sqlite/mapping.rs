use learn_core::model::{AttemptId, QuizAnswer, QuizCompletion, QuizId};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_completion_row(
    quiz_id: QuizId,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<QuizCompletion, StorageError> {
    let attempt_raw: String = row.try_get("attempt_id").map_err(ser)?;
    let attempt_id = attempt_raw
        .parse::<uuid::Uuid>()
        .map(AttemptId::from_uuid)
        .map_err(ser)?;
    let score = u32_from_i64("score", row.try_get::<i64, _>("score").map_err(ser)?)?;
    let total_questions = u32_from_i64(
        "total_questions",
        row.try_get::<i64, _>("total_questions").map_err(ser)?,
    )?;
    let answers_raw: String = row.try_get("answers").map_err(ser)?;
    let answers: Vec<QuizAnswer> = serde_json::from_str(&answers_raw).map_err(ser)?;
    let completed_at = row.try_get("completed_at").map_err(ser)?;

    QuizCompletion::new(
        quiz_id,
        attempt_id,
        score,
        total_questions,
        answers,
        completed_at,
    )
    .map_err(ser)
}
