use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use foldhash::fast::RandomState;
use tokio::{runtime::Handle, sync::oneshot, task::AbortHandle};

use crate::{
    ReplySlot,
    error::{Error, ErrorKind, Result},
};

/// What an asynchronous callback receives once its call is resolved.
#[derive(Debug)]
pub struct CallOutcome {
    pub id: u64,
    /// `Ok` means the reply slot has been filled.
    pub result: Result<()>,
    pub elapsed: Duration,
}

pub type Callback = Box<dyn FnOnce(CallOutcome) + Send + Sync>;

enum Notify {
    Waiter(oneshot::Sender<Result<()>>),
    Callback {
        callback: Callback,
        /// `true` once the initiating `call` has returned successfully.
        released: oneshot::Receiver<bool>,
        /// Runtime the callback is spawned on, whichever thread resolves it.
        runtime: Handle,
    },
}

/// One outstanding two-way call.
///
/// Resolving consumes the entry, so whoever holds it after removal from
/// [`PendingCalls`] is the only party able to resolve it.
pub struct PendingCall {
    slot: Box<dyn ReplySlot>,
    notify: Notify,
    started: Instant,
    timer: Option<AbortHandle>,
}

/// Held by the caller of a synchronous call.
pub type SyncReceiver = oneshot::Receiver<Result<()>>;

/// Held by the caller of an asynchronous call.
///
/// The callback runs only after `true` is sent. Sending `false` or dropping
/// the handle discards it, which is how a failed send withdraws the call.
pub type ReleaseHandle = oneshot::Sender<bool>;

impl PendingCall {
    /// A call whose caller waits on the returned receiver.
    #[must_use]
    pub fn sync(slot: Box<dyn ReplySlot>) -> (Self, SyncReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot,
                notify: Notify::Waiter(tx),
                started: Instant::now(),
                timer: None,
            },
            rx,
        )
    }

    /// A call completed through `callback`, gated by the returned
    /// [`ReleaseHandle`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime. The callback is later
    /// spawned on that runtime, so resolving the call works from any thread.
    #[must_use]
    pub fn with_callback(slot: Box<dyn ReplySlot>, callback: Callback) -> (Self, ReleaseHandle) {
        let (tx, released) = oneshot::channel();
        (
            Self {
                slot,
                notify: Notify::Callback {
                    callback,
                    released,
                    runtime: Handle::current(),
                },
                started: Instant::now(),
                timer: None,
            },
            tx,
        )
    }

    pub(crate) fn set_timer(&mut self, timer: AbortHandle) {
        self.timer = Some(timer);
    }

    /// Whether the call completes through a callback.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.notify, Notify::Callback { .. })
    }

    pub(crate) fn slot(&mut self) -> &mut dyn ReplySlot {
        self.slot.as_mut()
    }

    /// Delivers the terminal result: wakes the waiter or schedules the
    /// callback. Never blocks.
    pub fn resolve(mut self, id: u64, result: Result<()>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        match self.notify {
            Notify::Waiter(tx) => {
                // the waiter is gone only if the caller dropped its future.
                let _ = tx.send(result);
            }
            Notify::Callback {
                callback,
                released,
                runtime,
            } => {
                let outcome = CallOutcome {
                    id,
                    result,
                    elapsed: self.started.elapsed(),
                };
                runtime.spawn(async move {
                    if let Ok(true) = released.await {
                        callback(outcome);
                    } else {
                        tracing::debug!("discard callback of withdrawn call {id}");
                    }
                });
            }
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("async", &self.is_async())
            .field("started", &self.started)
            .finish()
    }
}

/// Registry of outstanding calls on one connection, keyed by request id.
///
/// Removal is the claim: the dispatcher and the timeout path both try to
/// remove an id, and only the one that gets the entry resolves it.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<u64, PendingCall, RandomState>,
    closed: AtomicBool,
}

impl PendingCalls {
    /// Registers a call before its request leaves the process.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentifier` if `id` is already outstanding and
    /// `ConnectionClosed` once the registry has been closed. The rejected
    /// call is dropped unresolved.
    pub fn register(&self, id: u64, call: PendingCall) -> Result<()> {
        let closed = || {
            Error::new(
                ErrorKind::ConnectionClosed,
                format!("msg id {id} registered after close"),
            )
        };
        if self.is_closed() {
            return Err(closed());
        }
        match self.calls.entry(id) {
            Entry::Occupied(_) => {
                tracing::error!("duplicate pending call id: {id}");
                return Err(Error::new(
                    ErrorKind::DuplicateIdentifier,
                    format!("msg id {id} is already pending"),
                ));
            }
            Entry::Vacant(entry) => {
                entry.insert(call);
            }
        }
        // lost a race with `close`; its drain may have missed this entry.
        if self.is_closed() && self.remove_if_present(id) {
            return Err(closed());
        }
        Ok(())
    }

    /// Atomically removes and returns the call for `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no call is outstanding: the response is late,
    /// duplicated or answers a one-way request.
    pub fn lookup_and_remove(&self, id: u64) -> Result<PendingCall> {
        self.calls
            .remove(&id)
            .map(|(_, call)| call)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("msg id {id} is not pending")))
    }

    /// Removes the call for `id` without resolving it.
    ///
    /// Returns false if the call was already claimed by someone else.
    pub fn remove_if_present(&self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Hands the timeout task of an asynchronous call to its entry, so that
    /// whoever resolves the call also cancels the timer.
    ///
    /// Returns false if the call is no longer pending.
    pub(crate) fn attach_timer(&self, id: u64, timer: AbortHandle) -> bool {
        match self.calls.get_mut(&id) {
            Some(mut call) => {
                call.set_timer(timer);
                true
            }
            None => false,
        }
    }

    /// Whether a call with `id` is still waiting for its response.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.calls.contains_key(&id)
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Refuses further registrations and resolves every outstanding call
    /// with `err`.
    pub fn close(&self, err: &Error) {
        self.closed.store(true, Ordering::SeqCst);
        self.fail_all(err);
    }

    /// Whether [`close`](Self::close) has been called. A closed registry
    /// stays closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves every outstanding call with `err`.
    pub fn fail_all(&self, err: &Error) {
        let ids: Vec<u64> = self.calls.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Ok(call) = self.lookup_and_remove(id) {
                call.resolve(id, Err(err.clone()));
            }
        }
    }

    /// Registers `call` and returns a guard that removes it again on drop
    /// unless disarmed.
    pub(crate) fn register_guarded(&self, id: u64, call: PendingCall) -> Result<Registration<'_>> {
        self.register(id, call)?;
        Ok(Registration {
            pending: self,
            id,
            armed: true,
        })
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("len", &self.calls.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// RAII guard rolling back a registration.
///
/// Covers a failed send and a synchronous caller whose future is dropped
/// before resolution.
pub(crate) struct Registration<'a> {
    pending: &'a PendingCalls,
    id: u64,
    armed: bool,
}

impl Registration<'_> {
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed && self.pending.remove_if_present(self.id) {
            tracing::debug!("rolled back pending call {}", self.id);
        }
    }
}
