use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Applies schema versions that have not been recorded yet.
///
/// Version 1 creates progress, completed sections and quiz completions.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS progress (
                    user_id INTEGER NOT NULL,
                    module_id INTEGER NOT NULL,
                    section_max INTEGER NOT NULL CHECK (section_max >= 1),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, module_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS progress_completed_sections (
                    user_id INTEGER NOT NULL,
                    module_id INTEGER NOT NULL,
                    section INTEGER NOT NULL CHECK (section >= 1),
                    PRIMARY KEY (user_id, module_id, section)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_completions (
                    user_id INTEGER NOT NULL,
                    quiz_id INTEGER NOT NULL,
                    attempt_id TEXT NOT NULL,
                    score INTEGER NOT NULL CHECK (score >= 0),
                    total_questions INTEGER NOT NULL CHECK (total_questions >= score),
                    answers TEXT NOT NULL,
                    completed_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, quiz_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
