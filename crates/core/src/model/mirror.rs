//! Shapes persisted in the on-device local mirror.
//!
//! Every entry carries a `schemaVersion`. Entries written before versioning
//! existed deserialize as version 0 and are upgraded on read; entries from a
//! newer build are rejected so the caller can treat them as absent.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AttemptId, QuizId};
use crate::model::progress::{ProgressError, ProgressRecord};
use crate::model::quiz::{
    AnswerValue, CompletionSummary, MAX_QUIZ_QUESTIONS, QuizAnswer, QuizAttempt, QuizCompletion,
    QuizError,
};

/// Schema version written by this build.
pub const MIRROR_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MirrorSchemaError {
    #[error("unsupported mirror schema version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
}

fn check_version(found: u32) -> Result<(), MirrorSchemaError> {
    if found > MIRROR_SCHEMA_VERSION {
        return Err(MirrorSchemaError::UnsupportedVersion {
            found,
            supported: MIRROR_SCHEMA_VERSION,
        });
    }
    Ok(())
}

//
// ─── PROGRESS ENTRY ────────────────────────────────────────────────────────────
//

/// Cached progression for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMirrorEntry {
    #[serde(default)]
    pub schema_version: u32,
    pub section_max: u32,
    #[serde(default)]
    pub completed_sections: BTreeSet<u32>,
    /// Set while a reset has been applied locally but not confirmed durably.
    #[serde(default)]
    pub pending_reset: bool,
}

impl ProgressMirrorEntry {
    #[must_use]
    pub fn from_record(record: &ProgressRecord) -> Self {
        Self {
            schema_version: MIRROR_SCHEMA_VERSION,
            section_max: record.section_max(),
            completed_sections: record.completed_sections().clone(),
            pending_reset: false,
        }
    }

    /// Bring an entry read from disk up to the current schema.
    ///
    /// # Errors
    ///
    /// Returns `MirrorSchemaError` if the entry is from a newer schema or its
    /// values break record invariants.
    pub fn upgrade(mut self) -> Result<Self, MirrorSchemaError> {
        check_version(self.schema_version)?;
        self.record()?;
        self.schema_version = MIRROR_SCHEMA_VERSION;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns `ProgressError` if the cached values are invalid.
    pub fn record(&self) -> Result<ProgressRecord, ProgressError> {
        ProgressRecord::new(self.section_max, self.completed_sections.iter().copied())
    }

    pub fn store_record(&mut self, record: &ProgressRecord) {
        self.section_max = record.section_max();
        self.completed_sections = record.completed_sections().clone();
    }
}

//
// ─── QUIZ ENTRY ────────────────────────────────────────────────────────────────
//

/// Cached state of one quiz: the in-progress attempt, or the completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizMirrorEntry {
    #[serde(default)]
    pub schema_version: u32,
    pub attempt_id: AttemptId,
    #[serde(default)]
    pub current_question_index: u32,
    #[serde(default)]
    pub total_questions: Option<u32>,
    #[serde(default)]
    pub answers: Vec<QuizAnswer>,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub completion_flag: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// True once the durable store has acknowledged the completion.
    #[serde(default)]
    pub durable_confirmed: bool,
}

impl QuizMirrorEntry {
    #[must_use]
    pub fn from_attempt(attempt: &QuizAttempt) -> Self {
        Self {
            schema_version: MIRROR_SCHEMA_VERSION,
            attempt_id: attempt.attempt_id(),
            current_question_index: attempt.current_question_index(),
            total_questions: attempt.total_questions(),
            answers: attempt.answers().cloned().collect(),
            score: attempt.correct_count(),
            completion_flag: false,
            completed_at: None,
            durable_confirmed: false,
        }
    }

    #[must_use]
    pub fn from_completion(completion: &QuizCompletion, durable_confirmed: bool) -> Self {
        let last = completion.answers().last().map(|a| a.question_index);
        Self {
            schema_version: MIRROR_SCHEMA_VERSION,
            attempt_id: completion.attempt_id(),
            current_question_index: last.map_or(0, |i| i.saturating_add(1)),
            total_questions: Some(completion.total_questions()),
            answers: completion.answers().to_vec(),
            score: completion.score(),
            completion_flag: true,
            completed_at: Some(completion.completed_at()),
            durable_confirmed,
        }
    }

    /// # Errors
    ///
    /// Returns `MirrorSchemaError` if the entry is from a newer schema or a
    /// completed entry cannot be rebuilt into a valid completion.
    pub fn upgrade(mut self, quiz_id: QuizId) -> Result<Self, MirrorSchemaError> {
        check_version(self.schema_version)?;
        if self.completion_flag {
            self.completion(quiz_id)?;
        }
        self.schema_version = MIRROR_SCHEMA_VERSION;
        Ok(self)
    }

    #[must_use]
    pub fn to_attempt(&self, quiz_id: QuizId) -> QuizAttempt {
        QuizAttempt::resume(
            quiz_id,
            self.attempt_id,
            self.total_questions,
            self.answers.clone(),
        )
    }

    /// The stored completion, if this quiz is finished.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` if the cached fields are inconsistent.
    pub fn completion(&self, quiz_id: QuizId) -> Result<Option<QuizCompletion>, QuizError> {
        let (true, Some(completed_at)) = (self.completion_flag, self.completed_at) else {
            return Ok(None);
        };
        QuizCompletion::new(
            quiz_id,
            self.attempt_id,
            self.score,
            self.total_questions.unwrap_or(self.score),
            self.answers.clone(),
            completed_at,
        )
        .map(Some)
    }

    #[must_use]
    pub fn summary(&self) -> Option<CompletionSummary> {
        self.completion_flag.then(|| CompletionSummary {
            score: self.score,
            total_questions: self.total_questions.unwrap_or(self.score),
        })
    }

    /// Selected answer per question index, `None` where unanswered.
    #[must_use]
    pub fn answer_selections(&self) -> Vec<Option<AnswerValue>> {
        let mut out = vec![None; self.slot_count()];
        for answer in &self.answers {
            if let Some(slot) = out.get_mut(answer.question_index as usize) {
                *slot = Some(answer.user_answer.clone());
            }
        }
        out
    }

    /// Whether each question has been checked.
    #[must_use]
    pub fn answer_checked_flags(&self) -> Vec<bool> {
        let mut out = vec![false; self.slot_count()];
        for answer in &self.answers {
            if let Some(slot) = out.get_mut(answer.question_index as usize) {
                *slot = true;
            }
        }
        out
    }

    /// Whether each question was answered correctly.
    #[must_use]
    pub fn correct_flags(&self) -> Vec<bool> {
        let mut out = vec![false; self.slot_count()];
        for answer in &self.answers {
            if let Some(slot) = out.get_mut(answer.question_index as usize) {
                *slot = answer.is_correct;
            }
        }
        out
    }

    /// One slot per declared question, or per answered index when no total
    /// is declared; never more than [`MAX_QUIZ_QUESTIONS`].
    fn slot_count(&self) -> usize {
        let answered = self
            .answers
            .iter()
            .map(|a| a.question_index.saturating_add(1))
            .max()
            .unwrap_or(0);
        self.total_questions.unwrap_or(answered).min(MAX_QUIZ_QUESTIONS) as usize
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn legacy_progress_entry_is_upgraded() {
        let legacy: ProgressMirrorEntry =
            serde_json::from_str(r#"{"sectionMax":3,"completedSections":[1,2]}"#).unwrap();
        assert_eq!(legacy.schema_version, 0);

        let upgraded = legacy.upgrade().unwrap();
        assert_eq!(upgraded.schema_version, MIRROR_SCHEMA_VERSION);
        assert_eq!(upgraded.record().unwrap().section_max(), 3);
    }

    #[test]
    fn future_schema_is_rejected() {
        let entry: ProgressMirrorEntry =
            serde_json::from_str(r#"{"schemaVersion":99,"sectionMax":3}"#).unwrap();
        assert!(matches!(
            entry.upgrade(),
            Err(MirrorSchemaError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn invalid_progress_values_are_rejected() {
        let entry: ProgressMirrorEntry =
            serde_json::from_str(r#"{"schemaVersion":1,"sectionMax":0}"#).unwrap();
        assert!(matches!(
            entry.upgrade(),
            Err(MirrorSchemaError::Progress(ProgressError::InvalidSectionMax(0)))
        ));
    }

    #[test]
    fn quiz_entry_exposes_flag_arrays() {
        let mut attempt = QuizAttempt::new(QuizId::new(4), Some(3));
        attempt
            .record(QuizAnswer::grade(
                0,
                "a",
                AnswerValue::Flag(true),
                AnswerValue::Flag(true),
            ))
            .unwrap();
        attempt
            .record(QuizAnswer::grade(
                2,
                "c",
                AnswerValue::Flag(true),
                AnswerValue::Flag(false),
            ))
            .unwrap();
        let entry = QuizMirrorEntry::from_attempt(&attempt);

        assert_eq!(entry.current_question_index, 3);
        assert_eq!(entry.answer_checked_flags(), vec![true, false, true]);
        assert_eq!(entry.correct_flags(), vec![true, false, false]);
        assert_eq!(
            entry.answer_selections(),
            vec![Some(AnswerValue::Flag(true)), None, Some(AnswerValue::Flag(true))]
        );
        assert!(entry.summary().is_none());
    }

    #[test]
    fn flag_arrays_are_bounded_by_the_declared_total() {
        let entry = QuizMirrorEntry {
            schema_version: MIRROR_SCHEMA_VERSION,
            attempt_id: AttemptId::generate(),
            current_question_index: 0,
            total_questions: Some(2),
            answers: vec![QuizAnswer::grade(
                u32::MAX - 1,
                "stray",
                AnswerValue::Flag(true),
                AnswerValue::Flag(true),
            )],
            score: 0,
            completion_flag: false,
            completed_at: None,
            durable_confirmed: false,
        };
        assert_eq!(entry.correct_flags(), vec![false, false]);

        let undeclared = QuizMirrorEntry {
            total_questions: None,
            ..entry
        };
        assert_eq!(
            undeclared.answer_checked_flags().len(),
            MAX_QUIZ_QUESTIONS as usize
        );
    }

    #[test]
    fn completed_entry_round_trips_completion() {
        let mut attempt = QuizAttempt::new(QuizId::new(4), Some(2));
        attempt
            .record(QuizAnswer::grade(
                0,
                "a",
                AnswerValue::Choice(1),
                AnswerValue::Choice(1),
            ))
            .unwrap();
        let completion = attempt.finish(1, fixed_now()).unwrap();

        let entry = QuizMirrorEntry::from_completion(&completion, false);
        assert_eq!(entry.summary().unwrap().to_string(), "1/2");
        assert_eq!(entry.completion(QuizId::new(4)).unwrap(), Some(completion));
    }
}
