//! Reconciles the local mirror with the durable progress store.
//!
//! The mirror answers immediately; the durable store is authoritative once it
//! answers. Values from both sides are combined with the record merge (max
//! threshold, union of completed sections), so concurrent sessions and
//! optimistic writes never lose progress. `reset` is the only way down.
//!
//! Durable traffic for one module runs one call at a time: a reset waits for
//! an in-flight merge, and a merge queued behind a reset is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use learn_core::SyncState;
use learn_core::model::{
    Identity, ModuleId, ProgressDelta, ProgressMirrorEntry, ProgressRecord, UserId,
};
use storage::mirror::LocalMirror;
use storage::repository::{ProgressStore, StorageError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::lifetime::{AttentionSignal, ViewLifetime};
use crate::single_flight::KeyedLocks;

/// Result of a push once the durable half has been attempted.
#[derive(Debug)]
pub enum PushOutcome {
    /// The durable store merged the delta; carries the merged record.
    Persisted(ProgressRecord),
    /// The durable write failed. The optimistic local value is kept and the
    /// delta can be pushed again.
    Pending {
        local: ProgressRecord,
        delta: ProgressDelta,
        reason: SyncError,
    },
    /// Anonymous session: nothing is sent to the durable store.
    LocalOnly(ProgressRecord),
    /// The durable answer was not applied locally: the view ended, or the
    /// module was reset while the push was in flight. Carries the current
    /// local value.
    Discarded(ProgressRecord),
}

impl PushOutcome {
    /// The value the caller should render.
    #[must_use]
    pub fn record(&self) -> &ProgressRecord {
        match self {
            PushOutcome::Persisted(r) | PushOutcome::LocalOnly(r) | PushOutcome::Discarded(r) => r,
            PushOutcome::Pending { local, .. } => local,
        }
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(self, PushOutcome::Persisted(_))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ModuleSync {
    state: SyncState,
    /// Bumped by every reset; results started under an older epoch are dropped.
    reset_epoch: u64,
}

pub struct SyncReconciler {
    identity: Identity,
    mirror: LocalMirror,
    remote: Option<Arc<dyn ProgressStore>>,
    start_section: u32,
    modules: Mutex<HashMap<ModuleId, ModuleSync>>,
    durable_flights: KeyedLocks<ModuleId>,
}

impl SyncReconciler {
    /// `remote` is ignored for anonymous identities: they run local-only.
    #[must_use]
    pub fn new(
        identity: Identity,
        mirror: LocalMirror,
        remote: Option<Arc<dyn ProgressStore>>,
        start_section: u32,
    ) -> Self {
        let remote = if identity.is_anonymous() { None } else { remote };
        Self {
            identity,
            mirror,
            remote,
            start_section: start_section.max(ProgressRecord::FIRST_SECTION),
            modules: Mutex::new(HashMap::new()),
            durable_flights: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.remote.is_none()
    }

    #[must_use]
    pub fn state(&self, module: ModuleId) -> SyncState {
        self.module(module).state
    }

    /// What a module looks like before anything is known about it.
    #[must_use]
    pub fn default_record(&self) -> ProgressRecord {
        ProgressRecord::starting_at(self.start_section)
    }

    /// Mirror value, if any. Never suspends.
    #[must_use]
    pub fn snapshot(&self, module: ModuleId) -> Option<ProgressRecord> {
        let entry = self.mirror.load_progress(module)?;
        entry.record().ok()
    }

    /// Mirror value, or the start-section default.
    #[must_use]
    pub fn current(&self, module: ModuleId) -> ProgressRecord {
        self.snapshot(module)
            .unwrap_or_else(|| self.default_record())
    }

    /// [`SyncReconciler::pull_or`] with the start-section default.
    pub async fn pull(&self, module: ModuleId, lifetime: &ViewLifetime) -> ProgressRecord {
        self.pull_or(module, self.default_record(), lifetime).await
    }

    /// Fetch the durable record and merge it into the mirror.
    ///
    /// Failures are absorbed: the mirror's last value, or `default` when the
    /// mirror is empty, is returned instead. A result arriving after the view
    /// ended or after a reset of the module is dropped.
    pub async fn pull_or(
        &self,
        module: ModuleId,
        default: ProgressRecord,
        lifetime: &ViewLifetime,
    ) -> ProgressRecord {
        let fallback = |this: &Self| this.snapshot(module).unwrap_or_else(|| default.clone());

        let Some((user, remote)) = self.durable() else {
            return fallback(self);
        };
        if lifetime.is_ended() {
            return fallback(self);
        }
        let epoch = self.module(module).reset_epoch;

        let fetched = tokio::select! {
            biased;
            () = lifetime.ended() => {
                debug!(%module, "view ended, pull result discarded");
                return fallback(self);
            }
            fetched = self.fetch_durably(user, remote, module) => fetched,
        };

        if self.module(module).reset_epoch != epoch {
            debug!(%module, "module reset during pull, result discarded");
            return fallback(self);
        }

        match fetched {
            Ok(remote_record) => {
                let merged = self.merge_into_mirror(module, remote_record, &default);
                self.set_state(module, SyncState::on_confirmed);
                merged
            }
            Err(err) => {
                warn!(%module, error = %err, "pull failed, serving last known progress");
                self.set_state(module, SyncState::on_pull_failed);
                fallback(self)
            }
        }
    }

    /// Apply `delta` to the mirror and return the optimistic value.
    pub fn apply_local(&self, module: ModuleId, delta: &ProgressDelta) -> ProgressRecord {
        let default = self.default_record();
        let written = self.mirror.update_progress(module, |entry| {
            let mut record = entry
                .as_ref()
                .and_then(|e| e.record().ok())
                .unwrap_or_else(|| default.clone());
            record.apply(delta);
            match entry {
                Some(existing) => existing.store_record(&record),
                None => *entry = Some(ProgressMirrorEntry::from_record(&record)),
            }
            record
        });
        self.set_state(module, SyncState::on_local_write);

        match written {
            Ok(record) => record,
            Err(err) => {
                warn!(%module, error = %err, "optimistic mirror write failed");
                let mut record = self.current(module);
                record.apply(delta);
                record
            }
        }
    }

    /// Optimistic write followed by the durable merge.
    pub async fn push(
        &self,
        module: ModuleId,
        delta: ProgressDelta,
        lifetime: &ViewLifetime,
    ) -> PushOutcome {
        let local = self.apply_local(module, &delta);
        self.persist(module, delta, local, lifetime).await
    }

    /// Like [`SyncReconciler::push`] but returns right after the optimistic
    /// write; the durable half runs on a tokio task.
    ///
    /// Ending `lifetime` does not stop the durable write, only the local
    /// application of its answer.
    pub fn spawn_push(
        self: &Arc<Self>,
        module: ModuleId,
        delta: ProgressDelta,
        lifetime: ViewLifetime,
    ) -> (ProgressRecord, JoinHandle<PushOutcome>) {
        let local = self.apply_local(module, &delta);
        let this = Arc::clone(self);
        let optimistic = local.clone();
        let task =
            tokio::spawn(async move { this.persist(module, delta, local, &lifetime).await });
        (optimistic, task)
    }

    async fn persist(
        &self,
        module: ModuleId,
        delta: ProgressDelta,
        local: ProgressRecord,
        lifetime: &ViewLifetime,
    ) -> PushOutcome {
        let Some((user, remote)) = self.durable() else {
            return PushOutcome::LocalOnly(local);
        };
        let epoch = self.module(module).reset_epoch;

        // Not raced against the lifetime: the merge always reaches the store.
        let merged = self.merge_durably(user, remote, module, &delta, epoch).await;

        let superseded = self.module(module).reset_epoch != epoch;
        let remote_record = match merged {
            Ok(Some(record)) if !superseded => record,
            Err(err) if !superseded => {
                warn!(%module, error = %err, "push failed, keeping optimistic progress");
                return PushOutcome::Pending {
                    local,
                    delta,
                    reason: SyncError::NetworkUnavailable(err),
                };
            }
            _ => {
                debug!(%module, "module reset during push, result discarded");
                return PushOutcome::Discarded(self.current(module));
            }
        };

        if lifetime.is_ended() {
            debug!(%module, "view ended, push persisted but not applied locally");
            return PushOutcome::Discarded(self.current(module));
        }

        let merged = self.merge_into_mirror(module, Some(remote_record), &local);
        self.set_state(module, SyncState::on_confirmed);
        PushOutcome::Persisted(merged)
    }

    /// Overwrite the module with the reset value, locally and durably.
    ///
    /// If the durable half fails the mirror entry stays flagged and the next
    /// pull or push re-sends the reset before anything else. The durable
    /// reset waits for a merge already in flight for the module, and pushes
    /// that started before the reset never reach the store after it.
    pub async fn reset(&self, module: ModuleId) -> ProgressRecord {
        let reset = ProgressRecord::reset();
        {
            let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = modules.entry(module).or_default();
            entry.reset_epoch = entry.reset_epoch.wrapping_add(1);
        }

        let pending = self.remote.is_some();
        let written = self.mirror.update_progress(module, |entry| {
            let mut fresh = ProgressMirrorEntry::from_record(&reset);
            fresh.pending_reset = pending;
            *entry = Some(fresh);
        });
        if let Err(err) = written {
            warn!(%module, error = %err, "failed to write reset to local mirror");
        }

        let Some((user, remote)) = self.durable() else {
            info!(%module, "module reset locally");
            self.set_state(module, SyncState::on_local_write);
            return reset;
        };

        let flushed = {
            let _flight = self.durable_flights.lock(module).await;
            self.flush_pending_reset(user, remote, module).await
        };
        match flushed {
            Ok(()) => {
                info!(%module, %user, "module reset");
                self.set_state(module, SyncState::on_confirmed);
            }
            Err(err) => {
                warn!(%module, error = %err, "durable reset failed, will retry on next sync");
                self.set_state(module, SyncState::on_local_write);
            }
        }
        reset
    }

    /// Re-pull `module` every time `signal` fires, until `lifetime` ends.
    ///
    /// Each pulled value is published on the returned handle.
    pub fn refresh_on(
        self: &Arc<Self>,
        module: ModuleId,
        signal: &AttentionSignal,
        lifetime: ViewLifetime,
    ) -> RefreshHandle {
        let mut attention = signal.subscribe();
        let (tx, updates) = watch::channel(self.current(module));
        let this = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                let notified = tokio::select! {
                    biased;
                    () = lifetime.ended() => false,
                    notified = attention.next() => notified,
                };
                if !notified {
                    break;
                }
                let record = this.pull(module, &lifetime).await;
                if lifetime.is_ended() {
                    break;
                }
                tx.send_replace(record);
            }
            debug!(%module, "refresh loop stopped");
        });

        RefreshHandle { updates, task }
    }

    fn durable(&self) -> Option<(UserId, &Arc<dyn ProgressStore>)> {
        let user = self.identity.user_id()?;
        self.remote.as_ref().map(|remote| (user, remote))
    }

    fn module(&self, module: ModuleId) -> ModuleSync {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&module)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, module: ModuleId, transition: impl FnOnce(SyncState) -> SyncState) {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = modules.entry(module).or_default();
        entry.state = transition(entry.state);
    }

    /// Merge a durable answer into the mirror and return the merged value.
    ///
    /// An empty mirror takes the durable value, or `default` when the durable
    /// store has never seen the module.
    fn merge_into_mirror(
        &self,
        module: ModuleId,
        remote: Option<ProgressRecord>,
        default: &ProgressRecord,
    ) -> ProgressRecord {
        let written = self.mirror.update_progress(module, |entry| {
            let local = entry.as_ref().and_then(|e| e.record().ok());
            let merged = match (local, &remote) {
                (Some(local), Some(remote)) => local.merge(remote),
                (Some(local), None) => local,
                (None, Some(remote)) => remote.clone(),
                (None, None) => default.clone(),
            };
            match entry {
                Some(existing) => existing.store_record(&merged),
                None => *entry = Some(ProgressMirrorEntry::from_record(&merged)),
            }
            merged
        });

        written.unwrap_or_else(|err| {
            warn!(%module, error = %err, "failed to cache merged progress");
            let base = self.snapshot(module).unwrap_or_else(|| default.clone());
            remote.map_or(base.clone(), |remote| base.merge(&remote))
        })
    }

    async fn fetch_durably(
        &self,
        user: UserId,
        remote: &Arc<dyn ProgressStore>,
        module: ModuleId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let _flight = self.durable_flights.lock(module).await;
        self.flush_pending_reset(user, remote, module).await?;
        remote.fetch_progress(user, module).await
    }

    /// Merge `delta` durably unless the module was reset after `epoch`.
    ///
    /// `Ok(None)` means the delta predates a reset and was not sent.
    async fn merge_durably(
        &self,
        user: UserId,
        remote: &Arc<dyn ProgressStore>,
        module: ModuleId,
        delta: &ProgressDelta,
        epoch: u64,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let _flight = self.durable_flights.lock(module).await;
        if self.module(module).reset_epoch != epoch {
            return Ok(None);
        }
        self.flush_pending_reset(user, remote, module).await?;
        remote.merge_progress(user, module, delta).await.map(Some)
    }

    /// Send a reset whose durable half has not landed yet.
    ///
    /// The caller holds the module's durable flight.
    async fn flush_pending_reset(
        &self,
        user: UserId,
        remote: &Arc<dyn ProgressStore>,
        module: ModuleId,
    ) -> Result<(), StorageError> {
        let pending = self
            .mirror
            .load_progress(module)
            .is_some_and(|entry| entry.pending_reset);
        if !pending {
            return Ok(());
        }

        remote.reset_progress(user, module).await?;
        self.mirror.update_progress(module, |entry| {
            if let Some(entry) = entry {
                entry.pending_reset = false;
            }
        })?;
        debug!(%module, "pending reset confirmed");
        Ok(())
    }
}

/// Live view of a module kept fresh by [`SyncReconciler::refresh_on`].
pub struct RefreshHandle {
    updates: watch::Receiver<ProgressRecord>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    #[must_use]
    pub fn latest(&self) -> ProgressRecord {
        self.updates.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressRecord> {
        self.updates.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to stop. It stops once its view lifetime ends or
    /// the signal is dropped.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(error = %err, "refresh loop panicked");
        }
    }
}
