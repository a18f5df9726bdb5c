use std::future::Future;
use std::time::Duration;

use murmur_types::{Address, AddressError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Runs only the most recent of a burst of triggers, after a quiet delay.
///
/// Each `trigger` aborts the previous pending run; its receiver then resolves
/// to an error. Dropping the debouncer aborts whatever is pending.
#[derive(Default)]
pub struct Debouncer {
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger<F, T>(&mut self, delay: Duration, work: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.cancel();

        let (tx, rx) = oneshot::channel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(work.await);
        }));
        rx
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Address validation for a recipient field that changes per keystroke.
pub struct RecipientValidator {
    debouncer: Debouncer,
    delay: Duration,
}

impl RecipientValidator {
    pub fn new(delay: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(),
            delay,
        }
    }

    /// Schedule validation of `input`, superseding any earlier one. Empty
    /// input clears the pending check and returns `None`.
    pub fn submit(&mut self, input: &str) -> Option<oneshot::Receiver<Result<Address, AddressError>>> {
        if input.trim().is_empty() {
            self.debouncer.cancel();
            return None;
        }

        let input = input.to_string();
        Some(
            self.debouncer
                .trigger(self.delay, async move { Address::parse(&input) }),
        )
    }

    pub fn cancel(&mut self) {
        self.debouncer.cancel();
    }
}
