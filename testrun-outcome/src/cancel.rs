// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cancellation context for a single run.
//!
//! Only a launch-level timeout triggers cancellation. The context is passed explicitly into every
//! bounded wait; it does not interrupt log parsing or crash-reason extraction once those have
//! started.

use tokio::sync::watch;

/// A cloneable handle used to abort the outer waits of a run.
///
/// All clones observe the same state. Cancellation is one-way: once cancelled, a context stays
/// cancelled.
#[derive(Clone, Debug)]
pub struct CancellationContext {
    sender: watch::Sender<bool>,
}

impl CancellationContext {
    /// Creates a new, uncancelled context.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Waits until cancellation is requested.
    ///
    /// Returns immediately if the context is already cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender is owned by `self`, so it can't be dropped while we wait and `wait_for`
        // only fails if it is.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new()
    }
}
