use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AttemptId, QuizId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("score {score} exceeds total questions {total}")]
    ScoreExceedsTotal { score: u32, total: u32 },

    #[error("{answered} answers recorded for a quiz of {total} questions")]
    TooManyAnswers { answered: usize, total: u32 },

    #[error("question {0} answered more than once")]
    DuplicateQuestion(u32),

    #[error("question {index} is outside a quiz of {limit} questions")]
    QuestionOutOfRange { index: u32, limit: u32 },
}

/// Upper bound on questions per quiz, declared or not.
pub const MAX_QUIZ_QUESTIONS: u32 = 1_000;

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// A learner's answer or the expected answer to a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Choice(u32),
    Text(String),
}

impl AnswerValue {
    /// Whether `self`, given by the learner, matches `expected`.
    ///
    /// Free text is compared trimmed and case-insensitively.
    #[must_use]
    pub fn matches(&self, expected: &AnswerValue) -> bool {
        match (self, expected) {
            (AnswerValue::Text(given), AnswerValue::Text(want)) => {
                given.trim().eq_ignore_ascii_case(want.trim())
            }
            (given, want) => given == want,
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Flag(v) => write!(f, "{v}"),
            AnswerValue::Choice(v) => write!(f, "#{v}"),
            AnswerValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// One graded answer inside an attempt or a completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    pub question_index: u32,
    pub question_text: String,
    pub user_answer: AnswerValue,
    pub correct_answer: AnswerValue,
    pub is_correct: bool,
}

impl QuizAnswer {
    #[must_use]
    pub fn grade(
        question_index: u32,
        question_text: impl Into<String>,
        user_answer: AnswerValue,
        correct_answer: AnswerValue,
    ) -> Self {
        let is_correct = user_answer.matches(&correct_answer);
        Self {
            question_index,
            question_text: question_text.into(),
            user_answer,
            correct_answer,
            is_correct,
        }
    }
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

/// Result of recording an answer in an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { is_correct: bool },
    /// The question already had an answer in this attempt; nothing changed.
    Duplicate,
}

/// Answers collected so far for the current, not yet completed, attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAttempt {
    attempt_id: AttemptId,
    quiz_id: QuizId,
    total_questions: Option<u32>,
    current_question_index: u32,
    answers: BTreeMap<u32, QuizAnswer>,
}

impl QuizAttempt {
    #[must_use]
    pub fn new(quiz_id: QuizId, total_questions: Option<u32>) -> Self {
        Self::resume(quiz_id, AttemptId::generate(), total_questions, Vec::new())
    }

    /// Rebuild an attempt from persisted answers. Later duplicates and
    /// answers outside the question range are dropped.
    #[must_use]
    pub fn resume(
        quiz_id: QuizId,
        attempt_id: AttemptId,
        total_questions: Option<u32>,
        answers: Vec<QuizAnswer>,
    ) -> Self {
        let mut attempt = Self {
            attempt_id,
            quiz_id,
            total_questions,
            current_question_index: 0,
            answers: BTreeMap::new(),
        };
        for answer in answers {
            let _ = attempt.record(answer);
        }
        attempt
    }

    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn total_questions(&self) -> Option<u32> {
        self.total_questions
    }

    /// Declare the question count. Answers beyond it are dropped.
    pub fn set_total_questions(&mut self, total: u32) {
        self.total_questions = Some(total);
        let limit = self.question_limit();
        self.answers.retain(|&index, _| index < limit);
        self.current_question_index = self.answers.keys().next_back().map_or(0, |i| i + 1);
    }

    /// Exclusive bound on question indexes this attempt accepts.
    #[must_use]
    pub fn question_limit(&self) -> u32 {
        self.total_questions
            .map_or(MAX_QUIZ_QUESTIONS, |total| total.min(MAX_QUIZ_QUESTIONS))
    }

    /// Index of the first question after the highest one answered.
    #[must_use]
    pub fn current_question_index(&self) -> u32 {
        self.current_question_index
    }

    /// Record an answer unless its question already has one.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::QuestionOutOfRange` if the index is not below
    /// [`QuizAttempt::question_limit`].
    pub fn record(&mut self, answer: QuizAnswer) -> Result<RecordOutcome, QuizError> {
        let limit = self.question_limit();
        if answer.question_index >= limit {
            return Err(QuizError::QuestionOutOfRange {
                index: answer.question_index,
                limit,
            });
        }
        if self.answers.contains_key(&answer.question_index) {
            return Ok(RecordOutcome::Duplicate);
        }
        let is_correct = answer.is_correct;
        self.current_question_index = self.current_question_index.max(answer.question_index + 1);
        self.answers.insert(answer.question_index, answer);
        Ok(RecordOutcome::Recorded { is_correct })
    }

    #[must_use]
    pub fn answer_for(&self, question_index: u32) -> Option<&QuizAnswer> {
        self.answers.get(&question_index)
    }

    /// Answers ordered by question index.
    pub fn answers(&self) -> impl Iterator<Item = &QuizAnswer> {
        self.answers.values()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    /// Number of correct answers so far.
    #[must_use]
    pub fn correct_count(&self) -> u32 {
        let correct = self.answers.values().filter(|a| a.is_correct).count();
        u32::try_from(correct).unwrap_or(u32::MAX)
    }

    /// Question count used when the attempt is finished: the declared total,
    /// or the number of answered questions if that is larger or undeclared.
    #[must_use]
    pub fn effective_total(&self) -> u32 {
        let answered = u32::try_from(self.answers.len()).unwrap_or(u32::MAX);
        self.total_questions.unwrap_or(0).max(answered)
    }

    /// Seal the attempt into an immutable completion.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::ScoreExceedsTotal` if `score` is larger than the
    /// question count.
    pub fn finish(
        &self,
        score: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<QuizCompletion, QuizError> {
        QuizCompletion::new(
            self.quiz_id,
            self.attempt_id,
            score,
            self.effective_total(),
            self.answers.values().cloned().collect(),
            completed_at,
        )
    }
}

//
// ─── COMPLETION ────────────────────────────────────────────────────────────────
//

/// The single, immutable record of a finished quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CompletionWire", into = "CompletionWire")]
pub struct QuizCompletion {
    quiz_id: QuizId,
    attempt_id: AttemptId,
    score: u32,
    total_questions: u32,
    answers: Vec<QuizAnswer>,
    completed_at: DateTime<Utc>,
}

impl QuizCompletion {
    /// Validate and build a completion. Answers are stored ordered by question.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` if the score exceeds the total, there are more
    /// answers than questions, or a question appears twice.
    pub fn new(
        quiz_id: QuizId,
        attempt_id: AttemptId,
        score: u32,
        total_questions: u32,
        mut answers: Vec<QuizAnswer>,
        completed_at: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        if score > total_questions {
            return Err(QuizError::ScoreExceedsTotal {
                score,
                total: total_questions,
            });
        }
        if answers.len() > total_questions as usize {
            return Err(QuizError::TooManyAnswers {
                answered: answers.len(),
                total: total_questions,
            });
        }
        answers.sort_by_key(|a| a.question_index);
        if let Some(pair) = answers
            .windows(2)
            .find(|w| w[0].question_index == w[1].question_index)
        {
            return Err(QuizError::DuplicateQuestion(pair[0].question_index));
        }

        Ok(Self {
            quiz_id,
            attempt_id,
            score,
            total_questions,
            answers,
            completed_at,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn answers(&self) -> &[QuizAnswer] {
        &self.answers
    }

    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    #[must_use]
    pub fn summary(&self) -> CompletionSummary {
        CompletionSummary {
            score: self.score,
            total_questions: self.total_questions,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionWire {
    quiz_id: QuizId,
    #[serde(default = "AttemptId::generate")]
    attempt_id: AttemptId,
    score: u32,
    total_questions: u32,
    #[serde(default)]
    answers: Vec<QuizAnswer>,
    #[serde(default = "Utc::now")]
    completed_at: DateTime<Utc>,
}

impl TryFrom<CompletionWire> for QuizCompletion {
    type Error = QuizError;

    fn try_from(wire: CompletionWire) -> Result<Self, Self::Error> {
        QuizCompletion::new(
            wire.quiz_id,
            wire.attempt_id,
            wire.score,
            wire.total_questions,
            wire.answers,
            wire.completed_at,
        )
    }
}

impl From<QuizCompletion> for CompletionWire {
    fn from(c: QuizCompletion) -> Self {
        Self {
            quiz_id: c.quiz_id,
            attempt_id: c.attempt_id,
            score: c.score,
            total_questions: c.total_questions,
            answers: c.answers,
            completed_at: c.completed_at,
        }
    }
}

/// What a view shows instead of a finished quiz, e.g. "2/3".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub score: u32,
    pub total_questions: u32,
}

impl fmt::Display for CompletionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.score, self.total_questions)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
