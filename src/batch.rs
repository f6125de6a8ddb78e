//! IRCv3 batch and labeled-response bookkeeping.
//!
//! Open batches are arena-owned records keyed by the server-assigned
//! batch id. A nested batch is recorded in its parent's item list as a
//! placeholder when it opens (preserving arrival order) and resolved to
//! the assembled subtree when it closes, so no pointer cycles arise.
//!
//! Label ids are a per-connection monotonic counter, base-32 encoded for
//! the wire; 0 is reserved as invalid.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::message::Message;

/// An IRCv3 batch, or a single line within one.
///
/// When `message.command == "BATCH"` this is a batch node: `message` is
/// the opening BATCH command (whose tags pertain to the batch as a
/// whole) and `items` holds the contents in order. Otherwise it is an
/// ordinary line and `items` is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub message: Message,
    pub items: Vec<Batch>,
}

impl Batch {
    /// A single-message pseudo-batch, used to deliver a labeled response
    /// that arrived outside any BATCH.
    pub fn single(message: Message) -> Self {
        Batch {
            message,
            items: Vec::new(),
        }
    }
}

/// Callback receiving a labeled response: the assembled batch, or `None`
/// when the server never responded and the label expired.
pub type LabelCallback = Box<dyn FnOnce(Option<&Batch>) + Send>;

/// Invalid server input noticed while assembling batches. Logged, never
/// fatal.
#[derive(Debug, Error)]
pub(crate) enum BatchError {
    #[error("found duplicate batch ID")]
    DuplicateBatchId,
    #[error("parent batch ID not found")]
    NoParentBatch,
    #[error("tried to close batch, but batch ID not found")]
    BatchNotOpen,
    #[error("received labeled response from server, but we don't recognize the label")]
    UnknownLabel,
}

enum BatchItem {
    Message(Message),
    /// A nested batch that has opened but not yet closed.
    Open(String),
    Closed(Batch),
}

struct BatchInProgress {
    created_at: Instant,
    label: i64,
    parent: Option<String>,
    message: Message,
    items: Vec<BatchItem>,
}

impl BatchInProgress {
    fn assemble(self) -> Batch {
        let items = self
            .items
            .into_iter()
            .filter_map(|item| match item {
                BatchItem::Message(message) => Some(Batch::single(message)),
                BatchItem::Closed(batch) => Some(batch),
                BatchItem::Open(id) => {
                    warn!(batch_id = %id, "batch closed while nested batch still open, dropping");
                    None
                }
            })
            .collect();
        Batch {
            message: self.message,
            items,
        }
    }
}

struct PendingLabel {
    created_at: Instant,
    callback: LabelCallback,
}

/// A closed top-level batch ready for delivery, along with the label it
/// was opened under (0 when unlabeled).
pub(crate) struct FinishedBatch {
    pub batch: Batch,
    pub label: i64,
}

/// Tables for open batches and pending labels. Guarded by the
/// connection's batch mutex.
#[derive(Default)]
pub(crate) struct BatchState {
    batches: HashMap<String, BatchInProgress>,
    labels: HashMap<i64, PendingLabel>,
    label_counter: i64,
}

impl BatchState {
    /// Reset all tables for a fresh connection.
    pub fn reset(&mut self) {
        self.batches.clear();
        self.labels.clear();
        self.label_counter = 0;
    }

    /// Register a pending label callback, returning the wire form of the
    /// new label id.
    pub fn register_label(&mut self, callback: LabelCallback) -> String {
        // increment first: 0 is an invalid label
        self.label_counter += 1;
        let label = self.label_counter;
        self.labels.insert(
            label,
            PendingLabel {
                created_at: Instant::now(),
                callback,
            },
        );
        serialize_label(label)
    }

    /// Drop a pending label (e.g. because the tagged send failed).
    pub fn unregister_label(&mut self, label_str: &str) {
        let label = deserialize_label(label_str);
        if label != 0 {
            self.labels.remove(&label);
        }
    }

    /// Take the callback for a label, if we recognize it.
    pub fn take_label(&mut self, label: i64) -> Option<LabelCallback> {
        self.labels.remove(&label).map(|pending| pending.callback)
    }

    /// Record a BATCH open.
    pub fn open(
        &mut self,
        message: Message,
        id: &str,
        parent: Option<&str>,
        label: i64,
    ) -> Result<(), BatchError> {
        if self.batches.contains_key(id) {
            return Err(BatchError::DuplicateBatchId);
        }
        if let Some(parent_id) = parent {
            let parent = self
                .batches
                .get_mut(parent_id)
                .ok_or(BatchError::NoParentBatch)?;
            parent.items.push(BatchItem::Open(id.to_owned()));
        }
        self.batches.insert(
            id.to_owned(),
            BatchInProgress {
                created_at: Instant::now(),
                label,
                parent: parent.map(str::to_owned),
                message,
                items: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append an ordinary message carrying a `batch` tag.
    pub fn append(&mut self, id: &str, message: Message) -> bool {
        match self.batches.get_mut(id) {
            Some(bip) => {
                bip.items.push(BatchItem::Message(message));
                true
            }
            None => false,
        }
    }

    /// Record a BATCH close. A nested batch folds into its parent and
    /// yields nothing; a top-level batch is assembled for delivery.
    pub fn close(&mut self, id: &str) -> Result<Option<FinishedBatch>, BatchError> {
        let bip = self.batches.remove(id).ok_or(BatchError::BatchNotOpen)?;
        let label = bip.label;

        match bip.parent.clone() {
            Some(parent_id) => {
                let assembled = bip.assemble();
                match self.batches.get_mut(&parent_id) {
                    Some(parent) => {
                        if let Some(slot) = parent.items.iter_mut().find(
                            |item| matches!(item, BatchItem::Open(open_id) if open_id == id),
                        ) {
                            *slot = BatchItem::Closed(assembled);
                        }
                        Ok(None)
                    }
                    // parent expired or was never known; nothing to deliver
                    None => Err(BatchError::NoParentBatch),
                }
            }
            None => Ok(Some(FinishedBatch {
                batch: bip.assemble(),
                label,
            })),
        }
    }

    /// Sweep stale state. Batches older than `keep_alive` are dropped;
    /// labels older than `keep_alive` (or all of them, when `force`) are
    /// removed and their callbacks returned so the caller can invoke each
    /// exactly once with the nil-batch sentinel.
    pub fn expire(&mut self, keep_alive: Duration, force: bool) -> Vec<LabelCallback> {
        let now = Instant::now();

        let expired: Vec<i64> = self
            .labels
            .iter()
            .filter(|(_, pending)| force || now.duration_since(pending.created_at) > keep_alive)
            .map(|(&label, _)| label)
            .collect();
        let callbacks = expired
            .into_iter()
            .filter_map(|label| self.take_label(label))
            .collect();

        self.batches
            .retain(|_, bip| now.duration_since(bip.created_at) <= keep_alive);

        callbacks
    }
}

const LABEL_RADIX: u32 = 32;
const LABEL_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Encode a label id for the wire (lowercase base 32, matching
/// [`i64::from_str_radix`]).
pub(crate) fn serialize_label(label: i64) -> String {
    let mut n = label as u64;
    let mut buf = [0u8; 16];
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = LABEL_DIGITS[(n % LABEL_RADIX as u64) as usize];
        n /= LABEL_RADIX as u64;
        if n == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf[i..]).into_owned()
}

/// Decode a wire label; 0 (invalid) for anything unparsable.
pub(crate) fn deserialize_label(s: &str) -> i64 {
    i64::from_str_radix(s, LABEL_RADIX).unwrap_or(0)
}
