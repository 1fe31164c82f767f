//! Per-invocation execution context: operation key, attempt counter,
//! property bag, and the cancellation latch every suspension point races.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One-shot monotonic cancellation latch.
///
/// Once tripped it stays tripped; all pipeline suspension points race their
/// wait against [`CancellationToken::cancelled`] and abort when it resolves.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the latch. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// True once the latch has tripped.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when the latch trips; resolves immediately if it already has.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before re-checking so a concurrent cancel() cannot
        // slip between the check and the wait.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Mutable per-invocation record threaded through every strategy.
///
/// Shared as `Arc<Context>`; the attempt counter and property bag use
/// interior mutability so strategies can annotate the invocation in flight.
pub struct Context {
    operation_key: Option<String>,
    attempt_number: AtomicU32,
    properties: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("operation_key", &self.operation_key)
            .field("attempt_number", &self.attempt_number())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Fresh context with no operation key.
    pub fn new() -> Self {
        Self {
            operation_key: None,
            attempt_number: AtomicU32::new(0),
            properties: Mutex::new(HashMap::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Fresh context carrying an operation key (used for cache keying and
    /// observability).
    pub fn with_operation_key(key: impl Into<String>) -> Self {
        Self { operation_key: Some(key.into()), ..Self::new() }
    }

    pub fn operation_key(&self) -> Option<&str> {
        self.operation_key.as_deref()
    }

    /// Zero-based attempt counter; retry and hedging bump it.
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number.load(Ordering::SeqCst)
    }

    pub(crate) fn set_attempt_number(&self, attempt: u32) {
        self.attempt_number.store(attempt, Ordering::SeqCst);
    }

    /// Attach an arbitrary value to this invocation.
    pub fn set_property(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        let mut props = self.properties.lock().unwrap_or_else(|p| p.into_inner());
        props.insert(key.into(), Arc::new(value));
    }

    /// Typed lookup into the property bag. `None` on a missing key or a type
    /// mismatch.
    pub fn get_property<P: Any + Send + Sync>(&self, key: &str) -> Option<Arc<P>> {
        let props = self.properties.lock().unwrap_or_else(|p| p.into_inner());
        props.get(key).cloned().and_then(|v| v.downcast::<P>().ok())
    }

    /// The invocation's cancellation latch.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Trip this invocation's latch.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Sibling context for a speculative or derived attempt: same operation
    /// key and attempt number, duplicated property map, re-armed latch.
    ///
    /// The fork inherits an already-tripped latch at fork time but does NOT
    /// observe later cancellations of the parent, and cancelling the fork
    /// never touches the parent.
    pub fn fork(&self) -> Context {
        let cancellation = CancellationToken::new();
        if self.is_cancelled() {
            cancellation.cancel();
        }
        let properties = self.properties.lock().unwrap_or_else(|p| p.into_inner()).clone();
        Context {
            operation_key: self.operation_key.clone(),
            attempt_number: AtomicU32::new(self.attempt_number()),
            properties: Mutex::new(properties),
            cancellation,
        }
    }
}
