use tokio::sync::broadcast::{error::TryRecvError, Receiver};

/// Listens for a cancellation signal.
///
/// Cancellation is signalled through a broadcast `Receiver`. Only a single
/// value is ever sent; once it has been observed the listener stays
/// cancelled forever. A closed channel counts as a signal as well, so
/// dropping the last sender also cancels every listener.
///
/// Both the server-wide shutdown notification and the per-connection stop
/// request are delivered through this type.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` once the signal has been received.
    is_shutdown: bool,
    /// The receive half of the channel used to listen for the signal.
    notify: Receiver<()>,
}

impl Shutdown {
    /// Creates a new `Shutdown` backed by the given `Receiver`.
    pub fn new(notify: Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the signal has already been observed.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Non-blocking probe for the signal.
    ///
    /// The writer calls this before committing to wait on a handler task,
    /// mirroring a "cancellation requested?" check.
    pub(crate) fn check(&mut self) -> bool {
        if !self.is_shutdown {
            self.is_shutdown = !matches!(self.notify.try_recv(), Err(TryRecvError::Empty));
        }
        self.is_shutdown
    }

    /// Receive the cancellation notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If we've already received the signal, there's no need to wait for
        // another one.
        if self.is_shutdown {
            return;
        }

        // Cannot receive a `lag error` as only one value is ever sent.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn check_observes_signal_without_blocking() {
        let (tx, rx) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(rx);

        assert!(!shutdown.check());
        assert!(!shutdown.is_shutdown());

        tx.send(()).unwrap();
        assert!(shutdown.check());
        assert!(shutdown.is_shutdown());
        // Sticky after the first observation.
        assert!(shutdown.check());
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_signal() {
        let (tx, rx) = broadcast::channel::<()>(1);
        let mut shutdown = Shutdown::new(rx);

        drop(tx);
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }
}
