//! The transferable escape hatch for moving large buffers without cloning
//! them into the JSON payload.
//!
//! A [`TransferBuffer`] is a shared handle to a byte buffer. Wrapping one in
//! a call argument marks it for transfer: the engine extracts its bytes into
//! the outgoing [`crate::transport::Frame`]'s `transfers` list and leaves a
//! hidden marker in the argument's place in the JSON payload, to be scanned
//! for and stripped back out on the receiving end. Detaching empties the
//! original handle in place, so a caller holding a clone of the same `Arc`
//! observes the buffer going empty the moment it's sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Reserved key marking a transferred value's placeholder in a JSON
/// payload. Namespaced so it won't collide with a real schema key.
pub const TRANSFER_MARKER_KEY: &str = "__relay_fabric_transfer__";

/// A shared, transferable byte buffer. Cloning shares the same underlying
/// storage, so a caller that transfers a buffer and keeps a clone around
/// observes the detachment.
#[derive(Debug, Clone, Default)]
pub struct TransferBuffer(Arc<Mutex<Vec<u8>>>);

impl TransferBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(bytes)))
    }

    /// Current length. Becomes 0 once the buffer has been transferred.
    pub fn byte_length(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Detach: take the bytes out, leaving the shared handle empty.
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    /// Replace the buffer's contents (used by the receiving side after a
    /// transfer, to hand the peer a live, independently-owned buffer).
    fn fill(&self, bytes: Vec<u8>) {
        *self.0.lock().unwrap() = bytes;
    }
}

/// A tagged transferable value ready to ride alongside a [`crate::transport::Frame`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transferable {
    pub id: String,
    pub bytes: Vec<u8>,
}

/// A call argument: either plain JSON data, or a buffer to be transferred
/// rather than cloned.
pub enum CallArg {
    Value(Value),
    Transfer(TransferBuffer),
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self {
        CallArg::Value(value)
    }
}

/// Wrap a buffer so it is transferred (moved) instead of serialized inline.
/// Returns the same buffer handle back to the caller, so it can keep
/// composing it into other arguments before the call is actually sent.
pub fn with_transferable(buffer: TransferBuffer) -> (CallArg, TransferBuffer) {
    (CallArg::Transfer(buffer.clone()), buffer)
}

/// Split a list of call arguments into the JSON payload (with transfer
/// markers in place of transferred buffers) and the list of transfers to
/// attach to the outgoing frame. Detaches each transferred buffer in the
/// process.
pub fn prepare_args(args: Vec<CallArg>) -> (Vec<Value>, Vec<Transferable>) {
    let mut json_args = Vec::with_capacity(args.len());
    let mut transfers = Vec::new();

    for (index, arg) in args.into_iter().enumerate() {
        match arg {
            CallArg::Value(value) => json_args.push(value),
            CallArg::Transfer(buffer) => {
                let id = format!("t{index}");
                let bytes = buffer.take();
                transfers.push(Transferable {
                    id: id.clone(),
                    bytes,
                });
                json_args.push(serde_json::json!({ TRANSFER_MARKER_KEY: id }));
            }
        }
    }

    (json_args, transfers)
}

/// True if a JSON value is a transfer marker placeholder. Only direct
/// argument positions are ever checked; markers never appear nested inside
/// a payload since they replace the whole argument slot.
fn marker_id(value: &Value) -> Option<&str> {
    value.get(TRANSFER_MARKER_KEY).and_then(Value::as_str)
}

/// Reconstruct the received arguments by replacing each transfer marker
/// with the transferred bytes (rendered as a JSON array of byte values, the
/// honest Rust equivalent of a reconstituted `ArrayBuffer`).
pub fn resolve_args(mut args: Vec<Value>, transfers: &[Transferable]) -> Vec<Value> {
    for arg in &mut args {
        if let Some(id) = marker_id(arg) {
            if let Some(transfer) = transfers.iter().find(|t| t.id == id) {
                *arg = Value::Array(
                    transfer
                        .bytes
                        .iter()
                        .map(|b| Value::from(*b))
                        .collect(),
                );
            }
        }
    }
    args
}

/// Hand the received bytes back into a fresh [`TransferBuffer`] handle, for
/// callers that want buffer semantics (`byte_length`) on the receiving side
/// rather than a raw JSON byte array.
pub fn transfer_buffer_for(id: &str, transfers: &[Transferable]) -> Option<TransferBuffer> {
    transfers.iter().find(|t| t.id == id).map(|t| {
        let buffer = TransferBuffer::default();
        buffer.fill(t.bytes.clone());
        buffer
    })
}
