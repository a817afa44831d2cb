//! Event mechanics: envelopes, subjects, buses and acknowledgements.

pub mod bus;
pub mod delivery;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod routed;
pub mod subject;

pub use bus::{ConsumerConfig, DurableEventBus, EventBus, Subscription};
pub use delivery::{AckError, Acknowledger, Delivery};
pub use envelope::{EventEnvelope, HEADER_FORMAT, HEADER_MSG_ID, HEADER_TYPE};
pub use event::{Event, JSON_FORMAT};
pub use in_memory_bus::{ConsumerInfo, InMemoryBusError, InMemoryEventBus};
pub use routed::Routed;
pub use subject::{SubjectError, SubjectFilter};
