//! Outstanding-call table for the RMI correlation engine.
//!
//! Every outgoing invocation registers a oneshot waiter keyed by its
//! MessageId before the request frame is written. The receive path completes
//! the waiter when the correlated response arrives; shutdown drains every
//! entry with an OperationCancelled fault so no caller is left hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use crate::core::frame::Value;
use crate::error::LinkError;

/// What a pending caller receives when its response arrives.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// The remote method completed; this is its return value.
    Value(Value),
    /// The exchange failed; the error to surface to the caller.
    Fault(LinkError),
}

/// Pending response waiters: MessageId -> oneshot sender.
///
/// MessageIds are allocated here too, from an atomic counter that starts at
/// zero; zero itself is reserved as "none" and never handed out.
pub(crate) struct PendingCalls {
    table: Mutex<HashMap<i32, oneshot::Sender<CallOutcome>>>,
    next_id: AtomicI32,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        PendingCalls {
            table: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(0),
        }
    }

    /// Allocate the next MessageId. Monotonically increasing per connection.
    pub(crate) fn next_message_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Register a waiter under a fresh MessageId.
    pub(crate) fn register(&self) -> (i32, oneshot::Receiver<CallOutcome>) {
        let id = self.next_message_id();
        let (tx, rx) = oneshot::channel();
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        (id, rx)
    }

    /// Deliver an outcome to the waiter for `id`. Each entry can be matched
    /// at most once; an unmatched id is dropped with a logged error.
    pub(crate) fn complete(&self, id: i32, outcome: CallOutcome) -> bool {
        let waiter = self
            .table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match waiter {
            Some(tx) => {
                // The caller may have given up; that is not an error.
                let _ = tx.send(outcome);
                true
            }
            None => {
                warn!(in_response_to_id = id, "dropping response with no pending call");
                false
            }
        }
    }

    /// Remove a waiter whose request never made it onto the wire.
    pub(crate) fn remove(&self, id: i32) {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Release every waiter with an OperationCancelled fault. Called exactly
    /// once per shutdown path; afterwards the table is empty.
    pub(crate) fn drain_cancelled(&self) {
        let drained: Vec<_> = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(CallOutcome::Fault(LinkError::cancelled()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
