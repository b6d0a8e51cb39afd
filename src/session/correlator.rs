use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SessionError;
use crate::protocol::MessageBody;

pub(crate) type ReplySender = oneshot::Sender<Result<MessageBody, SessionError>>;

struct PendingRequest {
    reply: ReplySender,
    message_type: &'static str,
    registered_at: Instant,
}

/// Maps outbound message ids to their callers' pending outcomes.
///
/// Every entry settles exactly once: by a matching terminal reply, by the
/// caller's timeout (which removes the entry), or by the bulk sweep on
/// disconnect. A reply arriving for an id that is no longer here is
/// orphaned and dropped.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: HashMap<Uuid, PendingRequest>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, id: Uuid, message_type: &'static str, reply: ReplySender) {
        self.pending.insert(
            id,
            PendingRequest {
                reply,
                message_type,
                registered_at: Instant::now(),
            },
        );
    }

    /// Settle the entry for `id`, if it is still pending. Returns `false`
    /// for orphaned replies.
    pub(crate) fn settle(&mut self, id: Uuid, result: Result<MessageBody, SessionError>) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                tracing::trace!(
                    target = "session",
                    request = %id,
                    message_type = entry.message_type,
                    elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "request settled"
                );
                // The caller may have timed out and dropped its receiver;
                // that is its own settlement path.
                let _ = entry.reply.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without settling it. The caller's timeout
    /// already rejected the future on its side.
    pub(crate) fn abort(&mut self, id: Uuid) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Reject every outstanding entry with `ConnectionClosed`.
    pub(crate) fn sweep(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::debug!(
            target = "session",
            count = self.pending.len(),
            "rejecting all pending requests"
        );
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(SessionError::ConnectionClosed));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
