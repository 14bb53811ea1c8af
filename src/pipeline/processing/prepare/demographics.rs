use super::{non_negative, within, DomainPreparer, MetricCells, PrepareStats};
use crate::domain::{DemographicMetrics, FactMetrics, FactTable};

pub const FIELDS: &[&str] = &["population", "households", "pct_foreign", "mean_age"];

/// Padró-style population counts and composition
pub struct DemographicsPreparer;

impl DomainPreparer for DemographicsPreparer {
    fn table(&self) -> FactTable {
        FactTable::Demographics
    }

    fn build(&self, cells: &MetricCells<'_>, stats: &mut PrepareStats) -> FactMetrics {
        FactMetrics::Demographics(DemographicMetrics {
            population: non_negative(cells.integer("population"), "population", stats),
            households: non_negative(cells.integer("households"), "households", stats),
            pct_foreign: within(cells.number("pct_foreign"), 0.0..=100.0, "pct_foreign", stats),
            mean_age: within(cells.number("mean_age"), 0.0..=120.0, "mean_age", stats),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_percentages_and_ages_are_bounded() {
        let mut stats = PrepareStats::default();
        let cells = MetricCells::new(BTreeMap::from([
            ("population", Some("47.986")),
            ("households", None),
            ("pct_foreign", Some("130")),
            ("mean_age", Some("43,7")),
        ]));
        let metrics = DemographicsPreparer.build(&cells, &mut stats);
        assert_eq!(
            metrics,
            FactMetrics::Demographics(DemographicMetrics {
                population: Some(47986),
                households: None,
                pct_foreign: None,
                mean_age: Some(43.7),
            })
        );
        assert_eq!(stats.coerced.get("pct_foreign"), Some(&1));
    }
}
