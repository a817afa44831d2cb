use crate::EventEnvelope;

/// Helper trait for subject-addressed messages.
///
/// Buses use it to apply subscription filters, and workers use it to
/// partition deliveries so that one subject is handled by one thread at a time.
pub trait Routed {
    fn subject(&self) -> &str;
}

impl<E> Routed for EventEnvelope<E> {
    fn subject(&self) -> &str {
        EventEnvelope::subject(self)
    }
}
