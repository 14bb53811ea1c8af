use super::{positive, DomainPreparer, MetricCells, PrepareStats};
use crate::domain::{FactMetrics, FactTable, IncomeMetrics};

pub const FIELDS: &[&str] = &["household_income_eur", "income_per_capita_eur", "income_index"];

pub struct IncomePreparer;

impl DomainPreparer for IncomePreparer {
    fn table(&self) -> FactTable {
        FactTable::Income
    }

    fn build(&self, cells: &MetricCells<'_>, stats: &mut PrepareStats) -> FactMetrics {
        FactMetrics::Income(IncomeMetrics {
            household_income_eur: positive(
                cells.number("household_income_eur"),
                "household_income_eur",
                stats,
            ),
            income_per_capita_eur: positive(
                cells.number("income_per_capita_eur"),
                "income_per_capita_eur",
                stats,
            ),
            // Index is relative to the city average (100)
            income_index: positive(cells.number("income_index"), "income_index", stats),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_income_fields() {
        let mut stats = PrepareStats::default();
        let cells = MetricCells::new(BTreeMap::from([
            ("household_income_eur", Some("38412,5")),
            ("income_index", Some("87,4")),
        ]));
        let metrics = IncomePreparer.build(&cells, &mut stats);
        assert_eq!(
            metrics,
            FactMetrics::Income(IncomeMetrics {
                household_income_eur: Some(38412.5),
                income_per_capita_eur: None,
                income_index: Some(87.4),
            })
        );
        assert!(stats.coerced.is_empty());
    }
}
