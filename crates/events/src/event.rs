use serde::Serialize;

/// Content type carried in the `format` header of every JSON event.
pub const JSON_FORMAT: &str = "application/json";

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **typed** by a stable name carried in the `type` header
/// - serialised as the JSON body of a message
pub trait Event: Serialize + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "stock.sold").
    fn event_type(&self) -> &'static str;
}
