use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::TunnelError;
use crate::protocol::PromptResponse;

type Settle = oneshot::Sender<Result<Value, TunnelError>>;

/// A registered sender, tagged so a stale wait can never remove a newer one with the same id.
struct Slot {
    token: u64,
    tx: Settle,
}

/// What a registry does with a response that carries an `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponsePolicy {
    /// Reject the waiter with the error.
    Reject,
    /// Log the error and deregister, but leave the waiter pending so another
    /// answer source (a local interactive fallback) can still settle it.
    /// Detached waiters are only settled by `reject_all`.
    Detach,
}

/// Request-id keyed table of outstanding prompts.
#[derive(Clone)]
pub struct PromptRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    pending: Mutex<HashMap<String, Slot>>,
    detached: Mutex<Vec<(String, Slot)>>,
    next_token: AtomicU64,
    policy: ErrorResponsePolicy,
    label: &'static str,
}

impl PromptRegistry {
    pub fn new(label: &'static str, policy: ErrorResponsePolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                pending: Mutex::new(HashMap::new()),
                detached: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
                policy,
                label,
            }),
        }
    }

    /// Register interest in `request_id`. An id can only be pending once at a time.
    ///
    /// Dropping the returned wait before it settles deregisters it.
    pub fn wait_for(&self, request_id: &str) -> Result<PromptWait, TunnelError> {
        let (tx, rx) = oneshot::channel();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(request_id) || self.inner.is_detached(request_id) {
                return Err(TunnelError::DuplicateRequest(request_id.to_string()));
            }
            pending.insert(request_id.to_string(), Slot { token, tx });
        }
        Ok(PromptWait {
            request_id: request_id.to_string(),
            rx,
            cancel: PromptCancel {
                request_id: request_id.to_string(),
                token,
                inner: Arc::downgrade(&self.inner),
            },
        })
    }

    /// Route a response to its waiter. Returns false for an unknown id, which is not an error:
    /// the waiter may already have timed out or been cancelled.
    pub fn settle(&self, response: PromptResponse) -> bool {
        let Some(slot) = self.inner.pending.lock().remove(&response.request_id) else {
            tracing::debug!(
                target: "nestlog.prompt",
                registry = self.inner.label,
                request_id = %response.request_id,
                "ignoring response for unknown prompt"
            );
            return false;
        };

        let request_id = response.request_id.clone();
        match response.outcome() {
            Ok(value) => {
                let _ = slot.tx.send(Ok(value));
            }
            Err(message) => match self.inner.policy {
                ErrorResponsePolicy::Reject => {
                    let _ = slot.tx.send(Err(TunnelError::PromptRejected {
                        request_id,
                        message,
                    }));
                }
                ErrorResponsePolicy::Detach => {
                    tracing::warn!(
                        target: "nestlog.prompt",
                        registry = self.inner.label,
                        request_id = %request_id,
                        error = %message,
                        "prompt response carried an error; leaving prompt open for another answer"
                    );
                    self.inner.detached.lock().push((request_id, slot));
                }
            },
        }
        true
    }

    /// Reject one waiter. Returns false if it is no longer outstanding.
    pub fn reject(&self, request_id: &str, err: TunnelError) -> bool {
        match self.inner.take(request_id, None) {
            Some(tx) => {
                let _ = tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding waiter, detached ones included.
    pub fn reject_all(&self, err: TunnelError) -> usize {
        let drained: Vec<Settle> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, slot)| slot.tx)
            .collect();
        let detached: Vec<Settle> = self
            .inner
            .detached
            .lock()
            .drain(..)
            .map(|(_, slot)| slot.tx)
            .collect();

        let count = drained.len() + detached.len();
        for tx in drained.into_iter().chain(detached) {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.inner.pending.lock().contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl RegistryInner {
    /// Remove the sender for `request_id`. With `token`, only the registration it names.
    fn take(&self, request_id: &str, token: Option<u64>) -> Option<Settle> {
        let owns = |slot: &Slot| token.is_none() || token == Some(slot.token);
        {
            let mut pending = self.pending.lock();
            if pending.get(request_id).is_some_and(|slot| owns(slot)) {
                return pending.remove(request_id).map(|slot| slot.tx);
            }
        }
        let mut detached = self.detached.lock();
        let pos = detached
            .iter()
            .position(|(id, slot)| id == request_id && owns(slot))?;
        Some(detached.remove(pos).1.tx)
    }

    fn is_detached(&self, request_id: &str) -> bool {
        self.detached.lock().iter().any(|(id, _)| id == request_id)
    }
}

/// One outstanding prompt. Await [`PromptWait::result`] to get the answer.
pub struct PromptWait {
    request_id: String,
    rx: oneshot::Receiver<Result<Value, TunnelError>>,
    cancel: PromptCancel,
}

impl PromptWait {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Handle that cancels this wait from elsewhere.
    pub fn canceller(&self) -> PromptCancel {
        self.cancel.clone()
    }

    pub async fn result(mut self) -> Result<Value, TunnelError> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            // Registry dropped with the waiter still registered.
            Err(_) => Err(TunnelError::Destroyed),
        }
    }

    /// Like [`PromptWait::result`], racing a timer. A timeout deregisters the prompt.
    pub async fn result_with_timeout(
        mut self,
        timeout: Option<Duration>,
    ) -> Result<Value, TunnelError> {
        let Some(timeout) = timeout else {
            return self.result().await;
        };

        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TunnelError::Destroyed),
            Err(_) => {
                self.cancel.deregister();
                // A response may have landed between the timer firing and deregistration.
                if let Ok(outcome) = self.rx.try_recv() {
                    return outcome;
                }
                Err(TunnelError::PromptTimeout {
                    request_id: self.request_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for PromptWait {
    fn drop(&mut self) {
        if self.cancel.deregister() {
            tracing::trace!(
                target: "nestlog.prompt",
                request_id = %self.request_id,
                "prompt wait dropped before it settled"
            );
        }
    }
}

#[derive(Clone)]
pub struct PromptCancel {
    request_id: String,
    token: u64,
    inner: Weak<RegistryInner>,
}

impl PromptCancel {
    /// Reject the wait with a cancellation error. Returns false once it is already settled.
    pub fn cancel(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        match inner.take(&self.request_id, Some(self.token)) {
            Some(tx) => {
                let _ = tx.send(Err(TunnelError::Cancelled(self.request_id.clone())));
                true
            }
            None => false,
        }
    }

    /// Drop this registration without settling it. True if it was still outstanding.
    fn deregister(&self) -> bool {
        self.inner
            .upgrade()
            .and_then(|inner| inner.take(&self.request_id, Some(self.token)))
            .is_some()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelErrorKind;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn known_id_resolves_exactly_one_waiter() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let a = reg.wait_for("a").unwrap();
        let b = reg.wait_for("b").unwrap();

        assert!(reg.settle(PromptResponse::value("a", json!("yes"))));
        assert_eq!(a.result().await.unwrap(), json!("yes"));
        assert!(!reg.is_pending("a"));
        assert!(reg.is_pending("b"));
        drop(b);
    }

    #[tokio::test]
    async fn unknown_id_changes_nothing() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let _a = reg.wait_for("a").unwrap();
        assert!(!reg.settle(PromptResponse::value("zzz", json!(1))));
        assert_eq!(reg.pending_count(), 1);
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let _a = reg.wait_for("a").unwrap();
        let err = reg.wait_for("a").err().unwrap();
        assert!(matches!(err, TunnelError::DuplicateRequest(id) if id == "a"));
    }

    #[tokio::test]
    async fn cancel_twice_is_noop_after_first() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let wait = reg.wait_for("a").unwrap();
        let cancel = wait.canceller();

        assert!(cancel.cancel());
        assert!(!cancel.cancel());
        assert_eq!(reg.pending_count(), 0);
        assert!(matches!(wait.result().await, Err(TunnelError::Cancelled(_))));
    }

    #[tokio::test]
    async fn error_response_rejects_under_reject_policy() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let wait = reg.wait_for("a").unwrap();
        reg.settle(PromptResponse::error("a", "viewer closed"));
        let err = wait.result().await.unwrap_err();
        assert_eq!(err.kind(), TunnelErrorKind::Prompt);
        assert!(err.to_string().contains("viewer closed"));
    }

    #[tokio::test]
    async fn error_response_leaves_wait_open_under_detach_policy() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Detach);
        let wait = reg.wait_for("a").unwrap();
        let cancel = wait.canceller();
        let mut fut = tokio_test::task::spawn(wait.result());

        assert!(reg.settle(PromptResponse::error("a", "bad answer")));
        assert!(!reg.is_pending("a"));
        assert_pending!(fut.poll());

        // A second response for the same id is now unknown.
        assert!(!reg.settle(PromptResponse::value("a", json!(1))));
        assert_pending!(fut.poll());

        // The owner can still cancel it.
        assert!(cancel.cancel());
        let out = assert_ready!(fut.poll());
        assert!(matches!(out, Err(TunnelError::Cancelled(_))));
    }

    #[tokio::test]
    async fn reject_all_includes_detached() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Detach);
        let a = reg.wait_for("a").unwrap();
        let b = reg.wait_for("b").unwrap();
        reg.settle(PromptResponse::error("a", "bad"));

        assert_eq!(reg.reject_all(TunnelError::Destroyed), 2);
        assert!(matches!(a.result().await, Err(TunnelError::Destroyed)));
        assert!(matches!(b.result().await, Err(TunnelError::Destroyed)));
    }

    #[test]
    fn dropping_a_wait_deregisters_it() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let wait = reg.wait_for("a").unwrap();
        drop(wait);
        assert_eq!(reg.pending_count(), 0);
        // The id is free again.
        let _again = reg.wait_for("a").unwrap();
        assert!(reg.is_pending("a"));
    }

    #[tokio::test]
    async fn dropped_detached_wait_frees_its_id() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Detach);
        let wait = reg.wait_for("a").unwrap();
        reg.settle(PromptResponse::error("a", "bad"));
        assert!(reg.wait_for("a").is_err());
        drop(wait);
        assert!(reg.wait_for("a").is_ok());
    }

    #[tokio::test]
    async fn stale_cancel_leaves_newer_registration_alone() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let first = reg.wait_for("a").unwrap();
        let stale = first.canceller();
        reg.settle(PromptResponse::value("a", json!(1)));
        assert_eq!(first.result().await.unwrap(), json!(1));

        let second = reg.wait_for("a").unwrap();
        assert!(!stale.cancel());
        assert!(reg.is_pending("a"));
        reg.settle(PromptResponse::value("a", json!(2)));
        assert_eq!(second.result().await.unwrap(), json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_deregisters() {
        let reg = PromptRegistry::new("test", ErrorResponsePolicy::Reject);
        let wait = reg.wait_for("a").unwrap();
        let err = wait
            .result_with_timeout(Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!reg.is_pending("a"));
        // Late answer is ignored.
        assert!(!reg.settle(PromptResponse::value("a", json!(1))));
    }
}
