//! Inbound message routing: batches, labeled responses, and the
//! callback registry.

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::oneshot;
use tracing::warn;

use crate::batch::{deserialize_label, Batch, BatchError};
use crate::client::Connection;
use crate::ctcp::rewrite_ctcp;
use crate::error::{ClientError, Result};
use crate::message::{Message, Tags};
use crate::registry::{invoke_guarded, DISCONNECT_EVENT};

impl Connection {
    /// Route one inbound message: batch assembly and label resolution
    /// first (when negotiated), then the ordinary command handlers.
    ///
    /// Runs on the read task; all handlers for a message finish before
    /// the next message is parsed.
    pub(crate) fn run_callbacks(&self, msg: Message) {
        if self.flags.batch() {
            if msg.command == "BATCH" {
                self.handle_batch_command(msg);
                return;
            }
            if let Some(batch_id) = msg.tag("batch").map(str::to_owned) {
                if !self.batch_state().append(&batch_id, msg) {
                    warn!("ignoring command with unknown batch ID {}", batch_id);
                }
                return;
            }
        }

        if self.flags.labeled_response() {
            if let Some(label_str) = msg.tag("label").map(str::to_owned) {
                let label = deserialize_label(&label_str);
                let callback = if label != 0 {
                    self.batch_state().take_label(label)
                } else {
                    None
                };
                match callback {
                    Some(callback) => {
                        // a labeled reply outside any batch: deliver it
                        // as a single-message batch
                        let batch = Batch::single(msg);
                        invoke_guarded(self.config.allow_panic, move || {
                            callback(Some(&batch))
                        });
                    }
                    None => {
                        warn!("received unrecognized label from server: {}", label_str);
                    }
                }
                return;
            }
        }

        self.handle_message(msg);
    }

    /// A BATCH open (`+id`) or close (`-id`).
    fn handle_batch_command(&self, msg: Message) {
        let Some(reference) = msg.params.first() else {
            warn!("invalid BATCH command from server");
            return;
        };
        if reference.len() < 2 {
            warn!("invalid BATCH command from server");
            return;
        }
        let open = reference.starts_with('+');
        if !open && !reference.starts_with('-') {
            warn!("invalid BATCH ID from server: {}", reference);
            return;
        }
        let batch_id = reference[1..].to_owned();
        let parent_id = msg.tag("batch").map(str::to_owned);

        if open {
            let label = msg
                .tag("label")
                .map(deserialize_label)
                .unwrap_or_default();
            let result =
                self.batch_state()
                    .open(msg, &batch_id, parent_id.as_deref(), label);
            if let Err(err) = result {
                warn!(
                    "batch error: {} (batchID=`{}`, parentBatchID=`{}`)",
                    err,
                    batch_id,
                    parent_id.as_deref().unwrap_or("")
                );
            }
            return;
        }

        // close: a finished top-level batch goes to its label callback
        // if it was opened under one, otherwise to the batch handlers
        let (finished, callback) = {
            let mut batch_state = self.batch_state();
            match batch_state.close(&batch_id) {
                Ok(Some(finished)) => {
                    if finished.label != 0 {
                        match batch_state.take_label(finished.label) {
                            Some(callback) => (Some(finished.batch), Some(callback)),
                            None => {
                                warn!(
                                    "batch error: {} (batchID=`{}`)",
                                    BatchError::UnknownLabel,
                                    batch_id
                                );
                                (None, None)
                            }
                        }
                    } else {
                        (Some(finished.batch), None)
                    }
                }
                Ok(None) => (None, None),
                Err(err) => {
                    warn!(
                        "batch error: {} (batchID=`{}`, parentBatchID=`{}`)",
                        err,
                        batch_id,
                        parent_id.as_deref().unwrap_or("")
                    );
                    (None, None)
                }
            }
        };

        match (finished, callback) {
            (Some(batch), Some(callback)) => {
                invoke_guarded(self.config.allow_panic, move || callback(Some(&batch)));
            }
            (Some(batch), None) => self.handle_batch(&batch),
            _ => {}
        }
    }

    /// Deliver a closed batch through the registered batch handlers,
    /// "flattening" it into individual messages if none consumes it.
    ///
    /// Public so batch and label callbacks can process inner batches.
    pub fn handle_batch(&self, batch: &Batch) {
        let handlers = self.registry().get_batch();
        for handler in handlers {
            let handled = if self.config.allow_panic {
                handler(self, batch)
            } else {
                match panic::catch_unwind(AssertUnwindSafe(|| handler(self, batch))) {
                    Ok(handled) => handled,
                    Err(_) => {
                        warn!("caught panic in batch callback");
                        false
                    }
                }
            };
            if handled {
                return;
            }
        }
        self.handle_batch_naively(batch);
    }

    /// Recursively deliver every leaf of a batch, in order, through the
    /// normal command handlers.
    fn handle_batch_naively(&self, batch: &Batch) {
        if batch.message.command != "BATCH" {
            self.handle_message(batch.message.clone());
        }
        for item in &batch.items {
            self.handle_batch_naively(item);
        }
    }

    /// Run the ordinary command handlers for one message. Public so
    /// batch callbacks can process individual lines.
    pub fn handle_message(&self, mut msg: Message) {
        if self.config.enable_ctcp {
            rewrite_ctcp(&mut msg);
        }

        let pairs = self.registry().get(&msg.command);
        // handlers run in series on the read task; each invocation is
        // individually shielded from panics
        for pair in pairs {
            invoke_guarded(self.config.allow_panic, || (pair.callback)(self, &msg));
        }
    }

    /// Run the disconnect handlers with an empty message.
    pub(crate) fn run_disconnect_callbacks(&self) {
        let pairs = self.registry().get(DISCONNECT_EVENT);
        let msg = Message::default();
        for pair in pairs {
            invoke_guarded(self.config.allow_panic, || (pair.callback)(self, &msg));
        }
    }

    /// Send a command tagged with a fresh label. The server's reply is
    /// collected into a [`Batch`] and handed to `callback` instead of
    /// the normal handlers; on expiry or teardown the callback receives
    /// `None` instead.
    ///
    /// Requires the `labeled-response` capability (with `batch`).
    pub fn send_with_label<F>(
        &self,
        tags: Option<Tags>,
        command: &str,
        params: &[&str],
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Option<&Batch>) + Send + 'static,
    {
        if !self.flags.labeled_response() {
            return Err(ClientError::CapabilityNotNegotiated);
        }

        let label = self.batch_state().register_label(Box::new(callback));

        let mut msg = Message::with_params(command, params.iter().copied());
        if let Some(tags) = tags {
            for (name, value) in tags {
                msg.set_tag(&name, value);
            }
        }
        msg.set_tag("label", Some(label.clone()));

        let result = self.send_message(&msg);
        if result.is_err() {
            self.batch_state().unregister_label(&label);
        }
        result
    }

    /// Send a labeled command and wait for its response batch.
    ///
    /// Resolution is guaranteed: the label callback fires either with
    /// the server's response or with the expiry sentinel, which becomes
    /// [`ClientError::NoLabeledResponse`].
    pub async fn get_labeled_response(
        &self,
        tags: Option<Tags>,
        command: &str,
        params: &[&str],
    ) -> Result<Batch> {
        let (tx, rx) = oneshot::channel::<Option<Batch>>();
        self.send_with_label(tags, command, params, move |batch| {
            let _ = tx.send(batch.cloned());
        })?;

        match rx.await {
            Ok(Some(batch)) => Ok(batch),
            _ => Err(ClientError::NoLabeledResponse),
        }
    }
}
