//! Signals the host hands to the core: "this view is gone" and "re-sync now".

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation token tied to a view's lifetime.
///
/// Results of pulls and pushes that finish after [`ViewLifetime::end`] are
/// discarded without touching local state.
#[derive(Clone, Debug)]
pub struct ViewLifetime {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ViewLifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewLifetime {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the view closed. Idempotent.
    pub fn end(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the view has ended.
    pub async fn ended(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Host-driven "renewed attention" signal, e.g. a view regaining visibility.
///
/// Notifications coalesce: several `notify` calls before a subscriber wakes
/// produce a single refresh.
#[derive(Clone, Debug)]
pub struct AttentionSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for AttentionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AttentionSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn notify(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Subscribe to notifications sent after this call.
    #[must_use]
    pub fn subscribe(&self) -> AttentionSubscription {
        AttentionSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct AttentionSubscription {
    rx: watch::Receiver<u64>,
}

impl AttentionSubscription {
    /// Wait for the next notification. Returns false once every
    /// [`AttentionSignal`] handle has been dropped.
    pub async fn next(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
