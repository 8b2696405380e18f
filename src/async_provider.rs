use std::sync::Arc;

use tokio::sync::Notify;

/// The cooperative-suspension contract of §5/§6: `wait_until` blocks the caller until
/// `predicate` returns true, yielding control so inbound handlers can run and mutate state in
/// the meantime. `notify` is this crate's extension point letting `Node` wake waiters after
/// every state mutation (role transition, log append, commit advancement) instead of making
/// `wait_until` poll on a fixed interval.
#[tonic::async_trait]
pub trait AsyncProvider: Send + Sync {
    /// Suspends until `predicate()` returns true, re-checking it every time `notify` fires.
    async fn wait_until(&self, predicate: &mut (dyn FnMut() -> bool + Send));

    /// Wakes every caller currently suspended in `wait_until`.
    fn notify(&self);
}

/// The bundled reference `AsyncProvider`, built on `tokio::sync::Notify`.
#[derive(Clone, Default)]
pub struct TokioAsyncProvider {
    notify: Arc<Notify>,
}

impl TokioAsyncProvider {
    pub fn new() -> Self {
        Self { notify: Arc::new(Notify::new()) }
    }
}

#[tonic::async_trait]
impl AsyncProvider for TokioAsyncProvider {
    async fn wait_until(&self, predicate: &mut (dyn FnMut() -> bool + Send)) {
        loop {
            // Registering interest before re-checking the predicate avoids the lost-wakeup
            // race: a `notify()` between the check and the `.await` below is still observed.
            let notified = self.notify.notified();
            if predicate() {
                return;
            }
            notified.await;
        }
    }

    fn notify(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn wait_until_returns_immediately_when_already_true() {
        let provider = TokioAsyncProvider::new();
        tokio::time::timeout(Duration::from_millis(50), provider.wait_until(&mut || true))
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_until_wakes_on_notify() {
        let provider = Arc::new(TokioAsyncProvider::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter_provider = provider.clone();
        let waiter_ready = ready.clone();
        let waiter = tokio::spawn(async move {
            waiter_provider.wait_until(&mut || waiter_ready.load(Ordering::SeqCst)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ready.store(true, Ordering::SeqCst);
        provider.notify();

        tokio::time::timeout(Duration::from_millis(200), waiter).await.expect("should wake").unwrap();
    }
}
