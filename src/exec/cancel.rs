// src/exec/cancel.rs

use std::future;

use tokio::sync::oneshot;

/// Cancellation signal for one running instance.
///
/// Wraps the executor's oneshot so it can be awaited from several
/// `select!` sites in turn. If the sender is dropped without firing, the
/// signal never fires.
#[derive(Debug)]
pub struct CancelSignal {
    rx: Option<oneshot::Receiver<()>>,
    fired: bool,
}

impl CancelSignal {
    pub fn new(rx: oneshot::Receiver<()>) -> Self {
        Self {
            rx: Some(rx),
            fired: false,
        }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: None,
            fired: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&mut self) {
        if self.fired {
            return;
        }
        match self.rx.as_mut() {
            Some(rx) => match rx.await {
                Ok(()) => {
                    self.fired = true;
                    self.rx = None;
                }
                Err(_) => {
                    self.rx = None;
                    future::pending::<()>().await;
                }
            },
            None => future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_repeatedly_once_sent() {
        let (tx, rx) = oneshot::channel();
        let mut signal = CancelSignal::new(rx);
        tx.send(()).unwrap();
        signal.cancelled().await;
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_sender_never_fires() {
        let (tx, rx) = oneshot::channel::<()>();
        let mut signal = CancelSignal::new(rx);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(res.is_err());
        assert!(!signal.is_cancelled());
    }
}
