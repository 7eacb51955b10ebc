use async_trait::async_trait;
use chrono::Utc;
use learn_core::model::{ModuleId, ProgressDelta, ProgressRecord, UserId};
use sqlx::{Row, Sqlite, Transaction};

use super::SqliteRepository;
use super::mapping::{conn, id_i64, ser, u32_from_i64};
use crate::repository::{ProgressStore, StorageError};

async fn read_record(
    tx: &mut Transaction<'_, Sqlite>,
    user: i64,
    module: i64,
) -> Result<Option<ProgressRecord>, StorageError> {
    let row = sqlx::query(
        r"
            SELECT section_max
            FROM progress
            WHERE user_id = ?1 AND module_id = ?2
        ",
    )
    .bind(user)
    .bind(module)
    .fetch_optional(&mut **tx)
    .await
    .map_err(conn)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let section_max = u32_from_i64("section_max", row.try_get::<i64, _>("section_max").map_err(ser)?)?;

    let rows = sqlx::query(
        r"
            SELECT section
            FROM progress_completed_sections
            WHERE user_id = ?1 AND module_id = ?2
            ORDER BY section ASC
        ",
    )
    .bind(user)
    .bind(module)
    .fetch_all(&mut **tx)
    .await
    .map_err(conn)?;

    let mut completed = Vec::with_capacity(rows.len());
    for row in rows {
        completed.push(u32_from_i64("section", row.try_get::<i64, _>("section").map_err(ser)?)?);
    }

    ProgressRecord::new(section_max, completed).map(Some).map_err(ser)
}

#[async_trait]
impl ProgressStore for SqliteRepository {
    async fn fetch_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let user = id_i64("user_id", user.value())?;
        let module = id_i64("module_id", module.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let record = read_record(&mut tx, user, module).await?;
        tx.commit().await.map_err(conn)?;
        Ok(record)
    }

    async fn merge_progress(
        &self,
        user: UserId,
        module: ModuleId,
        delta: &ProgressDelta,
    ) -> Result<ProgressRecord, StorageError> {
        let user = id_i64("user_id", user.value())?;
        let module = id_i64("module_id", module.value())?;
        let section_max = i64::from(delta.section_max.unwrap_or(ProgressRecord::FIRST_SECTION).max(1));

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO progress (user_id, module_id, section_max, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id, module_id) DO UPDATE SET
                    section_max = max(progress.section_max, excluded.section_max),
                    updated_at = excluded.updated_at
            ",
        )
        .bind(user)
        .bind(module)
        .bind(section_max)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        for section in delta.completed_sections.iter().filter(|s| **s > 0) {
            sqlx::query(
                r"
                    INSERT OR IGNORE INTO progress_completed_sections (user_id, module_id, section)
                    VALUES (?1, ?2, ?3)
                ",
            )
            .bind(user)
            .bind(module)
            .bind(i64::from(*section))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        let record = read_record(&mut tx, user, module)
            .await?
            .ok_or(StorageError::NotFound)?;
        tx.commit().await.map_err(conn)?;
        Ok(record)
    }

    async fn reset_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<ProgressRecord, StorageError> {
        let user = id_i64("user_id", user.value())?;
        let module = id_i64("module_id", module.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO progress (user_id, module_id, section_max, updated_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(user_id, module_id) DO UPDATE SET
                    section_max = 1,
                    updated_at = excluded.updated_at
            ",
        )
        .bind(user)
        .bind(module)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
                DELETE FROM progress_completed_sections
                WHERE user_id = ?1 AND module_id = ?2
            ",
        )
        .bind(user)
        .bind(module)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(ProgressRecord::reset())
    }
}
