//! Shared session-state cell.
//!
//! The request path and the background worker both need to read, write, and
//! wait for the session state. [`StateCell`] wraps a watch channel so a
//! waiter observes every transition without polling.

use std::sync::Arc;

use tokio::sync::watch;

/// A shared, observable state value.
///
/// Clones refer to the same underlying cell.
#[derive(Clone)]
pub struct StateCell<S> {
    inner: Arc<watch::Sender<S>>,
}

impl<S: Clone + PartialEq + Send + Sync + 'static> StateCell<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { inner: Arc::new(tx) }
    }

    /// Current state snapshot.
    pub fn get(&self) -> S {
        self.inner.borrow().clone()
    }

    /// Transition to a new state, waking all waiters.
    pub fn set(&self, state: S) {
        // send_replace never fails; the sender side is always alive here.
        self.inner.send_replace(state);
    }

    /// True when the current state satisfies the predicate.
    pub fn is(&self, predicate: impl FnOnce(&S) -> bool) -> bool {
        predicate(&self.inner.borrow())
    }

    /// Wait until the state satisfies the predicate, returning the matching
    /// state. Returns immediately if it already does.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&S) -> bool) -> S {
        let mut rx = self.inner.subscribe();
        // The sender half lives in self, so wait_for cannot fail.
        match rx.wait_for(|s| predicate(s)).await {
            Ok(state) => state.clone(),
            Err(_) => unreachable!("state cell sender dropped while held"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Idle,
        Busy,
        Done,
    }

    #[tokio::test]
    async fn get_and_set() {
        let cell = StateCell::new(Phase::Idle);
        assert_eq!(cell.get(), Phase::Idle);
        cell.set(Phase::Busy);
        assert_eq!(cell.get(), Phase::Busy);
        assert!(cell.is(|s| *s == Phase::Busy));
    }

    #[tokio::test]
    async fn wait_for_wakes_on_transition() {
        let cell = StateCell::new(Phase::Idle);
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_for(|s| *s == Phase::Done).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cell.set(Phase::Busy);
        cell.set(Phase::Done);

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, Phase::Done);
    }

    #[tokio::test]
    async fn wait_for_returns_immediately_when_satisfied() {
        let cell = StateCell::new(Phase::Done);
        let state = tokio::time::timeout(Duration::from_millis(50), cell.wait_for(|s| *s == Phase::Done))
            .await
            .unwrap();
        assert_eq!(state, Phase::Done);
    }
}
