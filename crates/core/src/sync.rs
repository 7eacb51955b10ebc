use std::fmt;

/// Where a module's cached progress stands relative to the durable store.
///
/// ```text
/// Unsynced --pull/push ok--> Synced --pull fails--> Stale --pull ok--> Synced
/// ```
///
/// A reset forces `Synced` once confirmed. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Local only: written optimistically or never confirmed.
    #[default]
    Unsynced,
    /// The last pull or push round-tripped with the durable store.
    Synced,
    /// A pull failed; the last known value is being served.
    Stale,
}

impl SyncState {
    #[must_use]
    pub fn on_confirmed(self) -> Self {
        SyncState::Synced
    }

    #[must_use]
    pub fn on_pull_failed(self) -> Self {
        match self {
            SyncState::Unsynced => SyncState::Unsynced,
            SyncState::Synced | SyncState::Stale => SyncState::Stale,
        }
    }

    /// An optimistic local write the durable store has not seen yet.
    #[must_use]
    pub fn on_local_write(self) -> Self {
        SyncState::Unsynced
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncState::Unsynced => "unsynced",
            SyncState::Synced => "synced",
            SyncState::Stale => "stale",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_pull_cycle() {
        let state = SyncState::default();
        assert_eq!(state.on_pull_failed(), SyncState::Unsynced);

        let synced = state.on_confirmed();
        let stale = synced.on_pull_failed();
        assert_eq!(stale, SyncState::Stale);
        assert_eq!(stale.on_confirmed(), SyncState::Synced);
        assert_eq!(stale.on_local_write(), SyncState::Unsynced);
    }
}
