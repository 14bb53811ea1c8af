use super::{non_negative, positive, DomainPreparer, MetricCells, PrepareStats};
use crate::domain::{FactMetrics, FactTable, PriceMetrics};

pub const FIELDS: &[&str] = &["price_m2", "price_total", "transactions"];

/// Sale and rent price indicators. A price of zero or below is a placeholder in
/// the upstream extracts, never an observation.
pub struct PricesPreparer;

impl DomainPreparer for PricesPreparer {
    fn table(&self) -> FactTable {
        FactTable::Prices
    }

    fn build(&self, cells: &MetricCells<'_>, stats: &mut PrepareStats) -> FactMetrics {
        FactMetrics::Prices(PriceMetrics {
            price_m2: positive(cells.number("price_m2"), "price_m2", stats),
            price_total: positive(cells.number("price_total"), "price_total", stats),
            transactions: non_negative(cells.integer("transactions"), "transactions", stats),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_non_positive_prices_are_nulled() {
        let mut stats = PrepareStats::default();
        let cells = MetricCells::new(BTreeMap::from([
            ("price_m2", Some("-12,5")),
            ("price_total", Some("250000")),
            ("transactions", Some("n.d.")),
        ]));
        let metrics = PricesPreparer.build(&cells, &mut stats);
        assert_eq!(
            metrics,
            FactMetrics::Prices(PriceMetrics {
                price_m2: None,
                price_total: Some(250000.0),
                transactions: None,
            })
        );
        assert_eq!(stats.coerced.get("price_m2"), Some(&1));
        assert_eq!(PricesPreparer.table(), FactTable::Prices);
    }
}
