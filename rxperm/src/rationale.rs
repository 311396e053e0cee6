//! Rationale surfaces shown before re-asking for a permission
//!
//! A rationale is an explanation the user acknowledges before the host
//! prompt appears. It is only shown once a consumer starts waiting on the
//! request, never when the request is built.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rxperm_api::PermissionKind;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Which requested permissions are consulted for the rationale heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationalePolicy {
    /// Only the first permission of the request
    #[default]
    FirstKind,
    /// Show the rationale if any requested permission asks for one
    AnyKind,
}

impl RationalePolicy {
    /// The permissions whose rationale flag should be queried, in order
    pub fn candidates<'a>(&self, kinds: &'a [PermissionKind]) -> &'a [PermissionKind] {
        match self {
            Self::FirstKind => &kinds[..kinds.len().min(1)],
            Self::AnyKind => kinds,
        }
    }
}

/// Acknowledgement handle passed to a [`RationaleDialog`]
///
/// The waiting request proceeds when the handle is acknowledged or dropped,
/// so any way of dismissing the surface counts.
pub struct RationaleAck {
    tx: Option<oneshot::Sender<()>>,
}

impl RationaleAck {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn acknowledge(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RationaleAck {
    fn drop(&mut self) {
        self.signal();
    }
}

impl fmt::Debug for RationaleAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RationaleAck")
            .field("acknowledged", &self.tx.is_none())
            .finish()
    }
}

/// A UI surface that explains why permissions are needed
///
/// `show` is called at most once per request, on the task awaiting it.
/// Hand the ack to whatever closes the surface.
pub trait RationaleDialog: Send + Sync {
    fn show(&self, ack: RationaleAck);
}

/// Show `dialog` and wait until it is acknowledged
pub(crate) async fn show_and_wait(dialog: Arc<dyn RationaleDialog>) {
    let (ack, acknowledged) = RationaleAck::channel();
    dialog.show(ack);
    // Every sender path signals before dropping.
    let _ = acknowledged.await;
}

// ============================================================================
// Recording Dialog (for testing)
// ============================================================================

/// Dialog that records how often it was shown
///
/// By default acks are held until [`acknowledge_all`](Self::acknowledge_all)
/// is called; [`auto_acknowledge`](Self::auto_acknowledge) releases them
/// immediately.
#[derive(Default)]
pub struct RecordingRationaleDialog {
    auto: bool,
    shown: Mutex<usize>,
    held: Mutex<Vec<RationaleAck>>,
}

impl RecordingRationaleDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_acknowledge() -> Self {
        Self {
            auto: true,
            ..Self::default()
        }
    }

    pub fn show_count(&self) -> usize {
        *self.shown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acknowledge every dialog currently on screen
    pub fn acknowledge_all(&self) -> usize {
        let acks: Vec<_> = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = acks.len();
        acks.into_iter().for_each(RationaleAck::acknowledge);
        count
    }
}

impl RationaleDialog for RecordingRationaleDialog {
    fn show(&self, ack: RationaleAck) {
        *self.shown.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        if self.auto {
            ack.acknowledge();
        } else {
            self.held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ack);
        }
    }
}

impl fmt::Debug for RecordingRationaleDialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingRationaleDialog")
            .field("auto", &self.auto)
            .field("shown", &self.show_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_policy_candidates() {
        let kinds = [PermissionKind::Camera, PermissionKind::Microphone];
        assert_eq!(
            RationalePolicy::FirstKind.candidates(&kinds),
            &[PermissionKind::Camera]
        );
        assert_eq!(RationalePolicy::AnyKind.candidates(&kinds), &kinds);
        assert!(RationalePolicy::FirstKind.candidates(&[]).is_empty());
    }

    #[test]
    fn test_dropped_ack_counts_as_acknowledged() {
        let (ack, rx) = RationaleAck::channel();
        drop(ack);
        assert!(rx.now_or_never().unwrap().is_ok());
    }

    #[test]
    fn test_show_and_wait_is_lazy() {
        let dialog = Arc::new(RecordingRationaleDialog::new());
        let mut wait = Box::pin(show_and_wait(dialog.clone()));
        assert_eq!(dialog.show_count(), 0);

        assert!((&mut wait).now_or_never().is_none());
        assert_eq!(dialog.show_count(), 1);

        assert_eq!(dialog.acknowledge_all(), 1);
        assert!(wait.now_or_never().is_some());
    }
}
