use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Pause-all / continue control shared by every running operation.
///
/// Each operation gets a child token of the current root. `stop_all` cancels
/// the root and with it every child; `reset` installs a fresh root so new
/// operations can proceed. Cancelling one child leaves its siblings running.
#[derive(Debug, Default)]
pub struct StopControl {
    root: Mutex<CancellationToken>,
}

impl StopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for one operation. Already cancelled while the control is stopped.
    pub fn session_token(&self) -> CancellationToken {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    pub fn stop_all(&self) {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_cancelled()
    }

    pub fn reset(&self) {
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        if root.is_cancelled() {
            *root = CancellationToken::new();
        }
    }
}
