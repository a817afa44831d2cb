//! Demo stock-change generator.
//!
//! The generator keeps its own running count per product so the events it
//! emits stay plausible (it never sells more than it believes is on the
//! shelf). That count is local to the generator and is not the ledger.

use std::collections::HashMap;

use rand::Rng;

use stockflow_core::{DomainError, ProductName};

use crate::stock::{StockEvent, StockReplenished, StockSold};

pub const DEMO_PRODUCTS: [&str; 4] = ["Apples", "Oranges", "Pears", "Grapes"];

/// Largest batch a single replenishment brings in.
const MAX_REPLENISH: i64 = 99;

#[derive(Debug, Clone)]
pub struct StockGenerator {
    products: Vec<ProductName>,
    on_hand: HashMap<ProductName, i64>,
}

impl StockGenerator {
    pub fn new(products: Vec<ProductName>) -> Result<Self, DomainError> {
        if products.is_empty() {
            return Err(DomainError::validation("generator needs at least one product"));
        }
        Ok(Self {
            products,
            on_hand: HashMap::new(),
        })
    }

    /// Generator over [`DEMO_PRODUCTS`].
    pub fn demo() -> Self {
        Self {
            products: DEMO_PRODUCTS
                .iter()
                .filter_map(|p| ProductName::parse(*p).ok())
                .collect(),
            on_hand: HashMap::new(),
        }
    }

    pub fn products(&self) -> &[ProductName] {
        &self.products
    }

    /// What the generator believes is on hand (`None` if never touched).
    pub fn on_hand(&self, product: &ProductName) -> Option<i64> {
        self.on_hand.get(product).copied()
    }

    /// Pick a product and decide whether to sell or replenish it.
    ///
    /// Unseen products and products at one unit or less are replenished with
    /// 1..=99 units; anything else sells 1..=(on_hand - 1) units.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> StockEvent {
        let product = self.products[rng.gen_range(0..self.products.len())].clone();
        let on_hand = self.on_hand.get(&product).copied();

        match on_hand {
            Some(qty) if qty > 1 => {
                let quantity = rng.gen_range(1..qty);
                self.on_hand.insert(product.clone(), qty - quantity);
                StockEvent::Sold(StockSold {
                    product_name: product,
                    quantity,
                })
            }
            _ => {
                let quantity = rng.gen_range(1..=MAX_REPLENISH);
                *self.on_hand.entry(product.clone()).or_insert(0) += quantity;
                StockEvent::Replenished(StockReplenished {
                    product_name: product,
                    quantity,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn first_touch_replenishes() {
        let mut generator = StockGenerator::new(vec![ProductName::parse("Apples").unwrap()]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let event = generator.tick(&mut rng);
        assert!(matches!(event, StockEvent::Replenished(_)));
        assert!((1..=99).contains(&event.quantity()));
        assert_eq!(generator.on_hand(event.product_name()), Some(event.quantity()));
    }

    #[test]
    fn local_count_never_drops_below_one() {
        let mut generator = StockGenerator::demo();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..1_000 {
            let event = generator.tick(&mut rng);
            assert!(event.quantity() > 0);
            let left = generator.on_hand(event.product_name()).unwrap();
            assert!(left >= 1, "{} left for {}", left, event.product_name());
        }
    }

    #[test]
    fn events_only_touch_configured_products() {
        let mut generator = StockGenerator::demo();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..100 {
            let event = generator.tick(&mut rng);
            assert!(DEMO_PRODUCTS.contains(&event.product_name().as_str()));
        }
        assert_eq!(generator.products().len(), 4);
    }

    #[test]
    fn empty_product_list_is_rejected() {
        assert!(StockGenerator::new(Vec::new()).is_err());
    }
}
