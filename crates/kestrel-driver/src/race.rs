use kestrel_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// First-of-N race with cancellation.
///
/// Each branch is a spawned task that may resolve to `Some(winner)` or
/// settle quietly with `None` (a miss, a timeout it handled itself, an
/// error it chose to swallow). The first `Some` wins and every other branch
/// is aborted, so losers never surface stray errors after the race is over.
/// Used for "a matching window may appear on any of N event sources", and
/// general enough for any first-of-N wait.
pub struct RaceSet<T> {
    // Dropped at race time so recv() ends once every branch has settled.
    tx: Option<mpsc::UnboundedSender<T>>,
    rx: mpsc::UnboundedReceiver<T>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> RaceSet<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx,
            handles: Vec::new(),
        }
    }

    /// Add one branch to the race.
    pub fn spawn<F>(&mut self, branch: F)
    where
        F: Future<Output = Option<T>> + Send + 'static,
    {
        let Some(tx) = self.tx.clone() else {
            return;
        };
        self.handles.push(tokio::spawn(async move {
            if let Some(value) = branch.await {
                // The receiver may already be gone if another branch won.
                let _ = tx.send(value);
            }
        }));
    }

    /// Await the first winner, aborting all other branches.
    ///
    /// Fails with `E_WAIT_TIMEOUT` when the deadline expires or every branch
    /// settles without producing a value.
    pub async fn first(mut self, timeout: Duration, what: &str) -> Result<T> {
        self.tx.take();

        let start = std::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, self.rx.recv()).await;

        for handle in &self.handles {
            handle.abort();
        }

        match outcome {
            Ok(Some(winner)) => Ok(winner),
            // Every branch settled without a value, possibly well before the
            // deadline; report the real wait, not the unused budget.
            Ok(None) => Err(Error::WaitTimeout {
                what: format!("{} (every source settled without a match)", what),
                timeout_ms: start.elapsed().as_millis() as u64,
            }),
            Err(_) => Err(Error::WaitTimeout {
                what: what.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl<T> Drop for RaceSet<T> {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
