use std::collections::HashMap;

use crate::error::SessionError;
use crate::protocol::{Envelope, EventKind};

pub type ConnectionCallback = Box<dyn Fn(bool) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(SessionError) + Send + Sync>;
pub type MessageCallback = Box<dyn Fn(&Envelope) + Send + Sync>;

/// Subscriber set supplied at `connect()` and replaced only through the
/// explicit `update_callbacks` operation.
///
/// The general message callback fires for every inbound envelope except
/// keepalive traffic; per-type slots additionally fire for the event kinds
/// they are registered under.
#[derive(Default)]
pub struct SessionCallbacks {
    pub(crate) on_connection_change: Option<ConnectionCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_message: Option<MessageCallback>,
    pub(crate) events: HashMap<EventKind, MessageCallback>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe connection-status transitions as a boolean connected flag.
    pub fn on_connection_change(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_connection_change = Some(Box::new(f));
        self
    }

    /// Observe connection-level failures. These never surface as panics or
    /// synchronous errors.
    pub fn on_error(mut self, f: impl Fn(SessionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Observe every inbound envelope, regardless of type.
    pub fn on_message(mut self, f: impl Fn(&Envelope) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Register a slot for one event kind.
    pub fn on_event(
        mut self,
        kind: EventKind,
        f: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Self {
        self.events.insert(kind, Box::new(f));
        self
    }
}

/// Routes unsolicited inbound envelopes to the registered callbacks.
#[derive(Default)]
pub(crate) struct Dispatcher {
    callbacks: SessionCallbacks,
}

impl Dispatcher {
    pub(crate) fn replace(&mut self, callbacks: SessionCallbacks) {
        self.callbacks = callbacks;
    }

    pub(crate) fn connection_changed(&self, connected: bool) {
        if let Some(cb) = &self.callbacks.on_connection_change {
            cb(connected);
        }
    }

    pub(crate) fn connection_error(&self, error: SessionError) {
        tracing::warn!(target = "session", %error, "connection error");
        if let Some(cb) = &self.callbacks.on_error {
            cb(error);
        }
    }

    /// Fire the general callback only. Used for correlated replies, which
    /// are still inbound messages but not events.
    pub(crate) fn observe(&self, envelope: &Envelope) {
        if let Some(cb) = &self.callbacks.on_message {
            cb(envelope);
        }
    }

    /// Route an unsolicited envelope: general callback always, the matching
    /// type slot when one is registered. Unknown or unhandled types reach
    /// only the general callback.
    pub(crate) fn dispatch(&self, envelope: &Envelope) {
        self.observe(envelope);
        match envelope.body.event_kind() {
            Some(kind) => match self.callbacks.events.get(&kind) {
                Some(cb) => cb(envelope),
                None => tracing::debug!(
                    target = "session",
                    message_type = envelope.body.message_type(),
                    "no slot registered for event"
                ),
            },
            None => tracing::debug!(
                target = "session",
                message_type = envelope.body.message_type(),
                "unroutable event type"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorInfo, MessageBody};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn error_event() -> Envelope {
        Envelope::new(
            "s",
            MessageBody::Error(ErrorInfo {
                message: "backend fault".into(),
                code: Some("E42".into()),
            }),
        )
    }

    #[test]
    fn general_callback_fires_alongside_type_slot() {
        let general = Arc::new(AtomicUsize::new(0));
        let typed = Arc::new(AtomicUsize::new(0));
        let general_counter = general.clone();
        let typed_counter = typed.clone();

        let mut dispatcher = Dispatcher::default();
        dispatcher.replace(
            SessionCallbacks::new()
                .on_message(move |_| {
                    general_counter.fetch_add(1, Ordering::SeqCst);
                })
                .on_event(EventKind::Error, move |_| {
                    typed_counter.fetch_add(1, Ordering::SeqCst);
                }),
        );

        dispatcher.dispatch(&error_event());
        assert_eq!(general.load(Ordering::SeqCst), 1);
        assert_eq!(typed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_type_reaches_only_general_callback() {
        let general = Arc::new(AtomicUsize::new(0));
        let general_counter = general.clone();

        let mut dispatcher = Dispatcher::default();
        dispatcher.replace(SessionCallbacks::new().on_message(move |_| {
            general_counter.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.dispatch(&Envelope::new("s", MessageBody::Unknown));
        assert_eq!(general.load(Ordering::SeqCst), 1);
    }
}
