use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_core::{DomainError, ProductName, WarehouseId};
use stockflow_events::{Event, EventEnvelope};

pub const STOCK_SOLD: &str = "stock.sold";
pub const STOCK_REPLENISHED: &str = "stock.replenished";
pub const STOCK_LOW: &str = "stock.low";

/// Filter matching stock changes from any warehouse for any product.
pub const STOCK_CHANGES_FILTER: &str = "warehouse.*.product.*";

/// Subject a warehouse publishes a product's stock changes to.
pub fn stock_subject(warehouse: &WarehouseId, product: &ProductName) -> String {
    format!("warehouse.{warehouse}.product.{product}")
}

/// Subject a product's low-stock alerts are published to.
pub fn low_stock_subject(product: &ProductName) -> String {
    format!("product.{product}")
}

/// Event: units of a product were sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSold {
    pub product_name: ProductName,
    pub quantity: i64,
}

/// Event: units of a product were replenished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReplenished {
    pub product_name: ProductName,
    pub quantity: i64,
}

/// Event: a product's stock dropped below the low-stock threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStock {
    pub product_name: ProductName,
}

impl Event for StockSold {
    fn event_type(&self) -> &'static str {
        STOCK_SOLD
    }
}

impl Event for StockReplenished {
    fn event_type(&self) -> &'static str {
        STOCK_REPLENISHED
    }
}

impl Event for LowStock {
    fn event_type(&self) -> &'static str {
        STOCK_LOW
    }
}

/// A stock change as emitted by a warehouse.
///
/// Serialises to the flat body of the wrapped event; the variant travels in
/// the `type` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StockEvent {
    Sold(StockSold),
    Replenished(StockReplenished),
}

impl StockEvent {
    pub fn product_name(&self) -> &ProductName {
        match self {
            StockEvent::Sold(e) => &e.product_name,
            StockEvent::Replenished(e) => &e.product_name,
        }
    }

    pub fn quantity(&self) -> i64 {
        match self {
            StockEvent::Sold(e) => e.quantity,
            StockEvent::Replenished(e) => e.quantity,
        }
    }

    /// Wrap into an envelope addressed to the warehouse's product subject.
    pub fn to_envelope(
        &self,
        warehouse: &WarehouseId,
    ) -> Result<EventEnvelope<JsonValue>, serde_json::Error> {
        EventEnvelope::encode(stock_subject(warehouse, self.product_name()), self)
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::Sold(e) => e.event_type(),
            StockEvent::Replenished(e) => e.event_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Sold,
    Replenished,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event body: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// A validated stock change ready to be folded into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDelta {
    product_name: ProductName,
    quantity: i64,
    kind: DeltaKind,
}

impl StockDelta {
    pub fn new(product_name: ProductName, quantity: i64, kind: DeltaKind) -> Result<Self, DomainError> {
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        Ok(Self {
            product_name,
            quantity,
            kind,
        })
    }

    /// Decode a bus envelope.
    ///
    /// Returns `Ok(None)` for envelopes that are not stock changes.
    pub fn from_envelope(envelope: &EventEnvelope<JsonValue>) -> Result<Option<Self>, DecodeError> {
        let event = match envelope.event_type() {
            STOCK_SOLD => StockEvent::Sold(envelope.decode()?),
            STOCK_REPLENISHED => StockEvent::Replenished(envelope.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(Self::try_from(&event)?))
    }

    pub fn product_name(&self) -> &ProductName {
        &self.product_name
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn kind(&self) -> DeltaKind {
        self.kind
    }

    /// The change to the ledger: `+quantity` when replenished, `-quantity` when sold.
    pub fn signed(&self) -> i64 {
        match self.kind {
            DeltaKind::Replenished => self.quantity,
            DeltaKind::Sold => -self.quantity,
        }
    }
}

impl TryFrom<&StockEvent> for StockDelta {
    type Error = DomainError;

    fn try_from(event: &StockEvent) -> Result<Self, Self::Error> {
        let kind = match event {
            StockEvent::Sold(_) => DeltaKind::Sold,
            StockEvent::Replenished(_) => DeltaKind::Replenished,
        };
        Self::new(event.product_name().clone(), event.quantity(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockflow_core::MessageId;
    use stockflow_events::JSON_FORMAT;

    fn apples() -> ProductName {
        ProductName::parse("Apples").unwrap()
    }

    fn envelope(event_type: &str, body: JsonValue) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            MessageId::new(),
            "warehouse.46.product.Apples",
            event_type,
            JSON_FORMAT,
            body,
        )
    }

    #[test]
    fn subjects_follow_naming_scheme() {
        let w = WarehouseId::parse("46").unwrap();
        assert_eq!(stock_subject(&w, &apples()), "warehouse.46.product.Apples");
        assert_eq!(low_stock_subject(&apples()), "product.Apples");
    }

    #[test]
    fn stock_event_envelope_has_flat_body_and_type_header() {
        let w = WarehouseId::parse("46").unwrap();
        let event = StockEvent::Sold(StockSold {
            product_name: apples(),
            quantity: 4,
        });

        let env = event.to_envelope(&w).unwrap();
        assert_eq!(env.event_type(), "stock.sold");
        assert_eq!(env.subject(), "warehouse.46.product.Apples");
        assert_eq!(env.payload(), &json!({ "product_name": "Apples", "quantity": 4 }));
    }

    #[test]
    fn low_stock_body_only_carries_product() {
        let body = serde_json::to_value(LowStock { product_name: apples() }).unwrap();
        assert_eq!(body, json!({ "product_name": "Apples" }));
    }

    #[test]
    fn decodes_sold_and_replenished() {
        let body = json!({ "product_name": "Apples", "quantity": 5 });

        let sold = StockDelta::from_envelope(&envelope(STOCK_SOLD, body.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(sold.kind(), DeltaKind::Sold);
        assert_eq!(sold.signed(), -5);

        let rep = StockDelta::from_envelope(&envelope(STOCK_REPLENISHED, body))
            .unwrap()
            .unwrap();
        assert_eq!(rep.signed(), 5);
    }

    #[test]
    fn other_event_types_are_not_deltas() {
        let env = envelope(STOCK_LOW, json!({ "product_name": "Apples" }));
        assert!(StockDelta::from_envelope(&env).unwrap().is_none());
    }

    #[test]
    fn invalid_bodies_are_decode_errors() {
        let not_json_shape = envelope(STOCK_SOLD, json!({ "product": "Apples" }));
        assert!(matches!(
            StockDelta::from_envelope(&not_json_shape),
            Err(DecodeError::Json(_))
        ));

        let zero = envelope(STOCK_SOLD, json!({ "product_name": "Apples", "quantity": 0 }));
        assert!(matches!(
            StockDelta::from_envelope(&zero),
            Err(DecodeError::Invalid(_))
        ));

        let empty_name = envelope(STOCK_SOLD, json!({ "product_name": "", "quantity": 2 }));
        assert!(StockDelta::from_envelope(&empty_name).is_err());
    }

    #[test]
    fn events_with_non_positive_quantities_are_not_deltas() {
        for quantity in [-7, 0, i64::MIN] {
            let sold = StockEvent::Sold(StockSold {
                product_name: apples(),
                quantity,
            });
            assert!(StockDelta::try_from(&sold).is_err(), "quantity {quantity}");
        }

        let restock = StockEvent::Replenished(StockReplenished {
            product_name: apples(),
            quantity: 7,
        });
        assert_eq!(StockDelta::try_from(&restock).unwrap().signed(), 7);
    }
}
