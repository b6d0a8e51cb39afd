use std::collections::VecDeque;

use crate::error::SessionError;
use crate::protocol::Envelope;

/// FIFO buffer for sends attempted while the transport is not open.
///
/// Entries are replayed strictly in enqueue order on reconnection, each
/// transmitted exactly once. Unbounded unless the config sets a cap, in
/// which case overflowing sends are rejected rather than evicting anything
/// already accepted.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    entries: VecDeque<Envelope>,
    cap: Option<usize>,
}

impl OutboundQueue {
    pub(crate) fn new(cap: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
        }
    }

    pub(crate) fn push(&mut self, envelope: Envelope) -> Result<(), SessionError> {
        if let Some(cap) = self.cap {
            if self.entries.len() >= cap {
                return Err(SessionError::QueueFull);
            }
        }
        self.entries.push_back(envelope);
        Ok(())
    }

    /// Re-queue an entry at the head. Used when a write fails before the
    /// frame left the socket, so drain order is preserved.
    pub(crate) fn push_front(&mut self, envelope: Envelope) {
        self.entries.push_front(envelope);
    }

    pub(crate) fn pop(&mut self) -> Option<Envelope> {
        self.entries.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageBody;

    fn entry(text: &str) -> Envelope {
        Envelope::new(
            "s",
            MessageBody::SubmitDescription { text: text.into() },
        )
    }

    #[test]
    fn drains_in_enqueue_order() {
        let mut queue = OutboundQueue::new(None);
        queue.push(entry("a")).unwrap();
        queue.push(entry("b")).unwrap();
        queue.push(entry("c")).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|e| match e.body {
                MessageBody::SubmitDescription { text } => text,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cap_rejects_overflow_without_evicting() {
        let mut queue = OutboundQueue::new(Some(2));
        queue.push(entry("a")).unwrap();
        queue.push(entry("b")).unwrap();
        assert_eq!(queue.push(entry("c")), Err(SessionError::QueueFull));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut queue = OutboundQueue::new(None);
        queue.push(entry("a")).unwrap();
        queue.clear();
        assert!(queue.pop().is_none());
    }
}
