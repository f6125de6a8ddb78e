//! The callback registry.
//!
//! Handlers are stored per command key as an ordered vector of
//! `(id, callback)` pairs, so insertion order is a stable position and
//! library-internal handlers can be prepended ahead of user handlers.
//! Ids come from a per-connection monotonic counter.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::batch::Batch;
use crate::client::Connection;
use crate::message::Message;

/// Pseudo-command under which end-of-registration callbacks are tracked.
/// NUL-prefixed so it can never collide with a real IRC verb.
pub(crate) const REGISTRATION_EVENT: &str = "\u{0}REGISTRATION";

/// Pseudo-command executed once per disconnection.
pub(crate) const DISCONNECT_EVENT: &str = "\u{0}DISCONNECT";

/// A handler for an IRC command or numeric.
pub type Callback = Arc<dyn Fn(&Connection, &Message) + Send + Sync>;

/// A handler for a closed top-level batch. Returns true when it consumed
/// the batch, stopping further batch handlers and suppressing flattening.
pub type BatchCallback = Arc<dyn Fn(&Connection, &Batch) -> bool + Send + Sync>;

/// Identifies one registered callback for later removal or replacement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackId {
    pub(crate) command: String,
    pub(crate) id: u64,
}

#[derive(Clone)]
pub(crate) struct CallbackPair {
    pub id: u64,
    pub callback: Callback,
}

#[derive(Clone)]
struct BatchCallbackPair {
    id: u64,
    callback: BatchCallback,
}

/// Callback tables, guarded by the connection's events mutex.
#[derive(Default)]
pub(crate) struct Registry {
    events: HashMap<String, Vec<CallbackPair>>,
    batch_callbacks: Vec<BatchCallbackPair>,
    counter: u64,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Register a handler. `reuse_id` re-registers under an existing id
    /// (used for the twin end-of-registration entries).
    ///
    /// The empty command, `*`-prefixed commands, and `BATCH` are not
    /// valid registry keys; registration returns the null id.
    pub fn add(
        &mut self,
        command: &str,
        callback: Callback,
        prepend: bool,
        reuse_id: Option<u64>,
    ) -> CallbackId {
        let command = command.to_uppercase();
        if command.is_empty() || command.starts_with('*') || command == "BATCH" {
            return CallbackId::default();
        }

        let id = match reuse_id {
            Some(id) => id,
            None => self.next_id(),
        };
        let pair = CallbackPair { id, callback };
        let list = self.events.entry(command.clone()).or_default();
        if prepend {
            list.insert(0, pair);
        } else {
            list.push(pair);
        }
        CallbackId { command, id }
    }

    pub fn add_batch(&mut self, callback: BatchCallback) -> CallbackId {
        let id = self.next_id();
        self.batch_callbacks.push(BatchCallbackPair { id, callback });
        CallbackId {
            command: "BATCH".to_owned(),
            id,
        }
    }

    /// Remove one registration. The registration pseudo-command removes
    /// both of its twin entries.
    pub fn remove(&mut self, id: &CallbackId, endofmotd: &str, nomotd: &str) {
        match id.command.as_str() {
            REGISTRATION_EVENT => {
                self.remove_from(endofmotd, id.id);
                self.remove_from(nomotd, id.id);
            }
            "BATCH" => {
                self.batch_callbacks.retain(|pair| pair.id != id.id);
            }
            _ => self.remove_from(&id.command, id.id),
        }
    }

    fn remove_from(&mut self, command: &str, id: u64) {
        if let Some(list) = self.events.get_mut(command) {
            list.retain(|pair| pair.id != id);
        }
    }

    /// Replace a registered handler in place; applies to the next
    /// dispatch. False when the id is unknown.
    pub fn replace(&mut self, id: &CallbackId, callback: Callback) -> bool {
        let Some(list) = self.events.get_mut(&id.command) else {
            return false;
        };
        for pair in list {
            if pair.id == id.id {
                pair.callback = callback;
                return true;
            }
        }
        false
    }

    /// Drop all handlers for a command.
    pub fn clear(&mut self, command: &str) {
        self.events.remove(&command.to_uppercase());
    }

    /// Snapshot the handler list for a command, so dispatch runs without
    /// the events lock held.
    pub fn get(&self, command: &str) -> Vec<CallbackPair> {
        self.events
            .get(&command.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot the batch handler list in insertion order.
    pub fn get_batch(&self) -> Vec<BatchCallback> {
        self.batch_callbacks
            .iter()
            .map(|pair| pair.callback.clone())
            .collect()
    }
}

/// Run one handler invocation, containing any panic unless the caller
/// opted out. A recovered panic is logged with a backtrace and dispatch
/// of subsequent handlers continues.
pub(crate) fn invoke_guarded<F: FnOnce()>(allow_panic: bool, f: F) {
    if allow_panic {
        f();
        return;
    }
    if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let what: &str = if let Some(s) = cause.downcast_ref::<&str>() {
            s
        } else if let Some(s) = cause.downcast_ref::<String>() {
            s
        } else {
            "unknown panic payload"
        };
        error!(
            panic = %what,
            backtrace = %std::backtrace::Backtrace::force_capture(),
            "caught panic in callback"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Arc::new(|_conn, _msg| {})
    }

    #[test]
    fn test_add_uppercases_and_orders() {
        let mut reg = Registry::default();
        let a = reg.add("privmsg", noop(), false, None);
        let b = reg.add("PRIVMSG", noop(), false, None);
        let c = reg.add("PRIVMSG", noop(), true, None);

        assert_eq!(a.command, "PRIVMSG");
        let ids: Vec<u64> = reg.get("privmsg").iter().map(|p| p.id).collect();
        // prepend lands first, appends keep insertion order
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[test]
    fn test_rejected_commands_get_null_id() {
        let mut reg = Registry::default();
        assert_eq!(reg.add("", noop(), false, None), CallbackId::default());
        assert_eq!(reg.add("*fake", noop(), false, None), CallbackId::default());
        assert_eq!(reg.add("BATCH", noop(), false, None), CallbackId::default());
        assert!(reg.get("*fake").is_empty());
    }

    #[test]
    fn test_remove_exactly_one() {
        let mut reg = Registry::default();
        let a = reg.add("PING", noop(), false, None);
        let b = reg.add("PING", noop(), false, None);
        reg.remove(&a, "376", "422");
        let ids: Vec<u64> = reg.get("PING").iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b.id]);
    }

    #[test]
    fn test_remove_registration_twins() {
        let mut reg = Registry::default();
        let id = reg.add("376", noop(), false, None);
        reg.add("422", noop(), false, Some(id.id));
        let compound = CallbackId {
            command: REGISTRATION_EVENT.to_owned(),
            id: id.id,
        };
        reg.remove(&compound, "376", "422");
        assert!(reg.get("376").is_empty());
        assert!(reg.get("422").is_empty());
    }

    #[test]
    fn test_replace() {
        let mut reg = Registry::default();
        let id = reg.add("NOTICE", noop(), false, None);
        assert!(reg.replace(&id, noop()));
        let bogus = CallbackId {
            command: "NOTICE".to_owned(),
            id: 9999,
        };
        assert!(!reg.replace(&bogus, noop()));
    }

    #[test]
    fn test_clear() {
        let mut reg = Registry::default();
        reg.add("JOIN", noop(), false, None);
        reg.add("JOIN", noop(), false, None);
        reg.clear("join");
        assert!(reg.get("JOIN").is_empty());
    }

    #[test]
    fn test_batch_callbacks_ordered_and_removable() {
        let mut reg = Registry::default();
        let a = reg.add_batch(Arc::new(|_conn, _b| false));
        let _b = reg.add_batch(Arc::new(|_conn, _b| true));
        assert_eq!(reg.get_batch().len(), 2);
        reg.remove(&a, "376", "422");
        assert_eq!(reg.get_batch().len(), 1);
        assert_eq!(a.command, "BATCH");
    }

    #[test]
    fn test_invoke_guarded_contains_panic() {
        invoke_guarded(false, || panic!("boom"));
        // reaching here is the assertion
    }
}
