use std::sync::Arc;

use learn_core::Clock;
use learn_core::model::{
    AnswerValue, AttemptId, CompletionSummary, Identity, ProgressDelta, QuizAnswer, QuizAttempt,
    QuizCompletion, QuizId, QuizMirrorEntry, RecordOutcome, UserId,
};
use storage::mirror::LocalMirror;
use storage::repository::{CompletionStore, CompletionWrite};
use tracing::{debug, info, warn};

use crate::collaborators::Catalog;
use crate::error::TrackerError;
use crate::lifetime::ViewLifetime;
use crate::reconciler::SyncReconciler;
use crate::single_flight::KeyedLocks;

/// What a view should do when a learner opens a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStart {
    Fresh(AttemptId),
    /// An unfinished attempt was found in the mirror.
    Resumed {
        attempt_id: AttemptId,
        current_question_index: u32,
        answered: usize,
    },
    /// The quiz is finished; show the stored score instead of a retake.
    Completed(CompletionSummary),
}

/// Records quiz answers and seals each quiz at most once per learner.
pub struct QuizCompletionTracker {
    identity: Identity,
    mirror: LocalMirror,
    remote: Option<Arc<dyn CompletionStore>>,
    reconciler: Arc<SyncReconciler>,
    catalog: Arc<dyn Catalog>,
    clock: Clock,
    flights: KeyedLocks<QuizId>,
}

impl QuizCompletionTracker {
    /// `remote` is ignored for anonymous identities.
    #[must_use]
    pub fn new(
        mirror: LocalMirror,
        remote: Option<Arc<dyn CompletionStore>>,
        reconciler: Arc<SyncReconciler>,
        catalog: Arc<dyn Catalog>,
        clock: Clock,
    ) -> Self {
        let identity = reconciler.identity();
        let remote = if identity.is_anonymous() { None } else { remote };
        Self {
            identity,
            mirror,
            remote,
            reconciler,
            catalog,
            clock,
            flights: KeyedLocks::new(),
        }
    }

    /// Decide between a fresh attempt, a resumed one and a finished quiz.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the mirror cannot be written.
    pub async fn begin_attempt(
        &self,
        quiz: QuizId,
        total_questions: Option<u32>,
    ) -> Result<AttemptStart, TrackerError> {
        let _flight = self.flights.lock(quiz).await;

        if let Some(entry) = self.mirror.load_quiz(quiz) {
            if let Some(summary) = entry.summary() {
                return Ok(AttemptStart::Completed(summary));
            }
            let mut attempt = entry.to_attempt(quiz);
            if let Some(total) = total_questions {
                attempt.set_total_questions(total);
                self.store_attempt(&attempt)?;
            }
            return Ok(AttemptStart::Resumed {
                attempt_id: attempt.attempt_id(),
                current_question_index: attempt.current_question_index(),
                answered: attempt.answered_count(),
            });
        }

        if let Some(existing) = self.durable_completion(quiz).await {
            let summary = existing.summary();
            self.cache_completion(&existing, true)?;
            return Ok(AttemptStart::Completed(summary));
        }

        let attempt = QuizAttempt::new(quiz, total_questions);
        self.store_attempt(&attempt)?;
        debug!(%quiz, attempt = %attempt.attempt_id(), "quiz attempt started");
        Ok(AttemptStart::Fresh(attempt.attempt_id()))
    }

    /// Record one answer for the current attempt.
    ///
    /// A second answer to the same question within an attempt is ignored.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::AlreadyCompleted` if the quiz is finished,
    /// `TrackerError::Quiz` if the question index is outside the quiz and
    /// `TrackerError::Storage` if the mirror cannot be written.
    pub fn submit_answer(
        &self,
        quiz: QuizId,
        question_index: u32,
        question_text: impl Into<String>,
        user_answer: AnswerValue,
        correct_answer: AnswerValue,
    ) -> Result<RecordOutcome, TrackerError> {
        let answer = QuizAnswer::grade(question_index, question_text, user_answer, correct_answer);
        let outcome = self.mirror.update_quiz(quiz, |entry| {
            if let Some(summary) = entry.as_ref().and_then(QuizMirrorEntry::summary) {
                return Err(TrackerError::AlreadyCompleted(summary));
            }
            let mut attempt = entry
                .as_ref()
                .map_or_else(|| QuizAttempt::new(quiz, None), |e| e.to_attempt(quiz));
            let outcome = attempt.record(answer)?;
            if matches!(outcome, RecordOutcome::Recorded { .. }) {
                *entry = Some(QuizMirrorEntry::from_attempt(&attempt));
            }
            Ok(outcome)
        })??;

        if outcome == RecordOutcome::Duplicate {
            debug!(%quiz, question_index, "duplicate answer ignored");
        }
        Ok(outcome)
    }

    /// Seal the current attempt with `final_score`.
    ///
    /// Calls for the same quiz run one at a time. The completion is written to
    /// the mirror first, then to the durable store; a failed durable write is
    /// flagged for [`QuizCompletionTracker::retry_pending_completion`]. The
    /// section the quiz closes is then pushed as completed.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::AlreadyCompleted` with the stored score if the
    /// quiz was already completed on this device or any other,
    /// `TrackerError::Quiz` if the score is invalid and
    /// `TrackerError::Storage` if the mirror cannot be written.
    pub async fn complete_quiz(
        &self,
        quiz: QuizId,
        final_score: u32,
    ) -> Result<QuizCompletion, TrackerError> {
        let _flight = self.flights.lock(quiz).await;

        if let Some(summary) = self.mirror.load_quiz(quiz).and_then(|e| e.summary()) {
            info!(%quiz, %summary, "quiz already completed on this device");
            return Err(TrackerError::AlreadyCompleted(summary));
        }
        if let Some(existing) = self.durable_completion(quiz).await {
            let summary = existing.summary();
            self.cache_completion(&existing, true)?;
            info!(%quiz, %summary, "quiz already completed elsewhere");
            return Err(TrackerError::AlreadyCompleted(summary));
        }

        let completion = self.seal_attempt(quiz, final_score)?;

        if let Some((user, remote)) = self.durable() {
            match remote.record_completion(user, &completion).await {
                Ok(write) => {
                    if let Some(winner) = self.confirm(&completion, write)? {
                        return Err(TrackerError::AlreadyCompleted(winner.summary()));
                    }
                }
                Err(err) => {
                    warn!(%quiz, error = %err, "completion kept locally, durable write pending");
                }
            }
        }

        info!(%quiz, summary = %completion.summary(), "quiz completed");
        self.push_section_completed(quiz).await;
        Ok(completion)
    }

    /// Re-send a completion whose durable write failed earlier.
    ///
    /// Returns true once the durable store holds a completion for the quiz.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the durable store is still
    /// unreachable or the mirror cannot be written.
    pub async fn retry_pending_completion(&self, quiz: QuizId) -> Result<bool, TrackerError> {
        let _flight = self.flights.lock(quiz).await;
        let Some((user, remote)) = self.durable() else {
            return Ok(false);
        };
        let Some(entry) = self.mirror.load_quiz(quiz) else {
            return Ok(false);
        };
        if entry.durable_confirmed {
            return Ok(true);
        }
        let Some(completion) = entry.completion(quiz)? else {
            return Ok(false);
        };

        let write = remote.record_completion(user, &completion).await?;
        if self.confirm(&completion, write)?.is_none() {
            self.push_section_completed(quiz).await;
        }
        Ok(true)
    }

    /// Mirror first, then the durable store. Never writes.
    pub async fn is_already_completed(&self, quiz: QuizId) -> bool {
        self.completion_summary(quiz).await.is_some()
    }

    /// Stored score, e.g. for a "2/3" badge. Mirror first, then the durable
    /// store. Never writes.
    pub async fn completion_summary(&self, quiz: QuizId) -> Option<CompletionSummary> {
        if let Some(summary) = self.mirror.load_quiz(quiz).and_then(|e| e.summary()) {
            return Some(summary);
        }
        self.durable_completion(quiz)
            .await
            .map(|completion| completion.summary())
    }

    /// Mirror state of a quiz, for rendering per-question flags.
    #[must_use]
    pub fn snapshot(&self, quiz: QuizId) -> Option<QuizMirrorEntry> {
        self.mirror.load_quiz(quiz)
    }

    /// Drop an unfinished attempt. Completions are never removed.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the mirror cannot be written.
    pub fn abandon_attempt(&self, quiz: QuizId) -> Result<bool, TrackerError> {
        let removed = self.mirror.update_quiz(quiz, |entry| {
            let in_progress = entry.as_ref().is_some_and(|e| !e.completion_flag);
            if in_progress {
                *entry = None;
            }
            in_progress
        })?;
        Ok(removed)
    }

    fn durable(&self) -> Option<(UserId, &Arc<dyn CompletionStore>)> {
        let user = self.identity.user_id()?;
        self.remote.as_ref().map(|remote| (user, remote))
    }

    /// Durable completion, `None` if there is none or the store is unreachable.
    async fn durable_completion(&self, quiz: QuizId) -> Option<QuizCompletion> {
        let (user, remote) = self.durable()?;
        match remote.get_completion(user, quiz).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%quiz, error = %err, "durable completion lookup failed, using local state");
                None
            }
        }
    }

    fn store_attempt(&self, attempt: &QuizAttempt) -> Result<(), TrackerError> {
        let fresh = QuizMirrorEntry::from_attempt(attempt);
        self.mirror
            .update_quiz(attempt.quiz_id(), |entry| *entry = Some(fresh))?;
        Ok(())
    }

    /// Turn the mirror's current attempt into a completion in one
    /// read-modify-write, so answers submitted while the durable lookup was
    /// in flight are part of it.
    fn seal_attempt(
        &self,
        quiz: QuizId,
        final_score: u32,
    ) -> Result<QuizCompletion, TrackerError> {
        let now = self.clock.now();
        self.mirror.update_quiz(quiz, |entry| {
            if let Some(summary) = entry.as_ref().and_then(QuizMirrorEntry::summary) {
                return Err(TrackerError::AlreadyCompleted(summary));
            }
            let attempt = entry
                .as_ref()
                .map_or_else(|| QuizAttempt::new(quiz, None), |e| e.to_attempt(quiz));
            let completion = attempt.finish(final_score, now)?;
            *entry = Some(QuizMirrorEntry::from_completion(&completion, false));
            Ok(completion)
        })?
    }

    fn cache_completion(
        &self,
        completion: &QuizCompletion,
        durable_confirmed: bool,
    ) -> Result<(), TrackerError> {
        let fresh = QuizMirrorEntry::from_completion(completion, durable_confirmed);
        self.mirror
            .update_quiz(completion.quiz_id(), |entry| *entry = Some(fresh))?;
        Ok(())
    }

    /// Apply the durable answer to a completion write.
    ///
    /// Returns the durable completion if it belongs to another attempt, in
    /// which case it replaces ours in the mirror.
    fn confirm(
        &self,
        ours: &QuizCompletion,
        write: CompletionWrite,
    ) -> Result<Option<QuizCompletion>, TrackerError> {
        let created = write.is_created();
        let stored = write.into_completion();
        if stored.attempt_id() == ours.attempt_id() {
            if !created {
                debug!(quiz = %ours.quiz_id(), "durable store already held this attempt");
            }
            self.cache_completion(ours, true)?;
            return Ok(None);
        }
        info!(quiz = %ours.quiz_id(), "another session completed the quiz first");
        self.cache_completion(&stored, true)?;
        Ok(Some(stored))
    }

    async fn push_section_completed(&self, quiz: QuizId) {
        let Some(placement) = self.catalog.quiz_placement(quiz) else {
            return;
        };
        let sections = self.catalog.sections_per_module(placement.module);
        let delta = ProgressDelta::complete_section(placement.section, sections);
        // Not tied to a view: the completion outlives whatever view submitted it.
        let outcome = self
            .reconciler
            .push(placement.module, delta, &ViewLifetime::new())
            .await;
        debug!(
            %quiz,
            module = %placement.module,
            persisted = outcome.is_persisted(),
            "section progress pushed"
        );
    }
}
