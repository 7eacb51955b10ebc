use async_trait::async_trait;
use learn_core::model::{QuizCompletion, QuizId, UserId};

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_completion_row, ser};
use crate::repository::{CompletionStore, CompletionWrite, StorageError};

impl SqliteRepository {
    async fn select_completion(
        &self,
        user: i64,
        quiz_id: QuizId,
    ) -> Result<Option<QuizCompletion>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT attempt_id, score, total_questions, answers, completed_at
                FROM quiz_completions
                WHERE user_id = ?1 AND quiz_id = ?2
            ",
        )
        .bind(user)
        .bind(id_i64("quiz_id", quiz_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|row| map_completion_row(quiz_id, &row)).transpose()
    }
}

#[async_trait]
impl CompletionStore for SqliteRepository {
    async fn get_completion(
        &self,
        user: UserId,
        quiz: QuizId,
    ) -> Result<Option<QuizCompletion>, StorageError> {
        self.select_completion(id_i64("user_id", user.value())?, quiz)
            .await
    }

    async fn record_completion(
        &self,
        user: UserId,
        completion: &QuizCompletion,
    ) -> Result<CompletionWrite, StorageError> {
        let user = id_i64("user_id", user.value())?;
        let answers = serde_json::to_string(completion.answers()).map_err(ser)?;

        let res = sqlx::query(
            r"
                INSERT INTO quiz_completions (
                    user_id, quiz_id, attempt_id, score, total_questions, answers, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(user_id, quiz_id) DO NOTHING
            ",
        )
        .bind(user)
        .bind(id_i64("quiz_id", completion.quiz_id().value())?)
        .bind(completion.attempt_id().to_string())
        .bind(i64::from(completion.score()))
        .bind(i64::from(completion.total_questions()))
        .bind(answers)
        .bind(completion.completed_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 1 {
            return Ok(CompletionWrite::Created(completion.clone()));
        }

        let existing = self
            .select_completion(user, completion.quiz_id())
            .await?
            .ok_or(StorageError::Conflict)?;
        Ok(CompletionWrite::Existing(existing))
    }
}
