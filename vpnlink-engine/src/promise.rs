//! Single-value hand-off between tasks
//!
//! Wraps a tokio oneshot channel so the receiving side can tell "not yet
//! delivered" apart from "the producer went away".

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Producer half; consumed on delivery
#[derive(Debug)]
pub struct Resolver<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Resolver<T> {
    /// Deliver the value
    ///
    /// Returns the value back if the consumer is gone.
    pub fn resolve(self, value: T) -> std::result::Result<(), T> {
        self.tx.send(value)
    }
}

/// Observable state of a promise
#[derive(Debug, PartialEq, Eq)]
pub enum PromiseState<T> {
    /// No value yet, producer still alive
    Pending,
    /// Producer dropped without delivering
    Failed,
    /// Value delivered
    Ready(T),
}

/// Consumer half
#[derive(Debug)]
pub struct Promise<T> {
    what: &'static str,
    rx: oneshot::Receiver<T>,
}

/// Create a linked promise and resolver
///
/// `what` names the value in errors.
pub fn promise<T>(what: &'static str) -> (Resolver<T>, Promise<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Promise { what, rx })
}

impl<T> Promise<T> {
    /// Wait for the value
    pub async fn wait(self) -> Result<T> {
        let what = self.what;
        self.rx.await.map_err(|_| Error::Abandoned(what))
    }

    /// Check for the value without blocking
    pub fn try_get(&mut self) -> PromiseState<T> {
        match self.rx.try_recv() {
            Ok(value) => PromiseState::Ready(value),
            Err(oneshot::error::TryRecvError::Empty) => PromiseState::Pending,
            Err(oneshot::error::TryRecvError::Closed) => PromiseState::Failed,
        }
    }

    /// Name of the awaited value
    pub fn what(&self) -> &'static str {
        self.what
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_then_wait() {
        let (resolver, promise) = promise::<String>("interface name");
        resolver.resolve("tun0".into()).unwrap();
        assert_eq!(promise.wait().await.unwrap(), "tun0");
    }

    #[tokio::test]
    async fn test_dropped_resolver_fails() {
        let (resolver, promise) = promise::<bool>("link up");
        drop(resolver);
        let err = promise.wait().await.unwrap_err();
        assert!(matches!(err, Error::Abandoned("link up")));
    }

    #[test]
    fn test_try_get_states() {
        let (resolver, mut p) = promise::<u32>("value");
        assert_eq!(p.try_get(), PromiseState::Pending);
        resolver.resolve(7).unwrap();
        assert_eq!(p.try_get(), PromiseState::Ready(7));

        let (resolver, mut p) = promise::<u32>("value");
        drop(resolver);
        assert_eq!(p.try_get(), PromiseState::Failed);
    }

    #[tokio::test]
    async fn test_wait_across_tasks() {
        let (resolver, promise) = promise::<bool>("link up");
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = resolver.resolve(true);
        });
        assert!(promise.wait().await.unwrap());
    }
}
