//! One-shot completion signals.
//!
//! Backends and timers hand out a [`Completion`] when something starts and keep the matching
//! [`Completer`]. Completing consumes the completer, so a signal can never fire twice.

use std::fmt;

/// Creates a connected completer/completion pair.
pub fn channel() -> (Completer, Completion) {
    let (sender, receiver) = oneshot::channel();
    (Completer { sender }, Completion { receiver })
}

pub struct Completer {
    sender: oneshot::Sender<()>,
}

impl Completer {
    pub fn complete(self) {
        // the receiving side may have been dropped already, nobody is interested then
        let _ = self.sender.send(());
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

pub struct Completion {
    receiver: oneshot::Receiver<()>,
}

impl Completion {
    /// Polls the signal without blocking.
    ///
    /// A completer that was dropped without firing also counts as complete: whoever was
    /// supposed to signal has lost track of the thing we are waiting for.
    pub fn is_complete(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(()) => true,
            Err(oneshot::TryRecvError::Empty) => false,
            Err(oneshot::TryRecvError::Disconnected) => true,
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
