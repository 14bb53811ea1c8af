use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{NeighborhoodId, RunId};

/// The fact tables of the store, one per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactTable {
    Prices,
    Demographics,
    Income,
}

impl FactTable {
    pub const ALL: [FactTable; 3] = [FactTable::Prices, FactTable::Demographics, FactTable::Income];

    pub fn table_name(&self) -> &'static str {
        match self {
            FactTable::Prices => "fact_prices",
            FactTable::Demographics => "fact_demographics",
            FactTable::Income => "fact_income",
        }
    }

    /// The `data_type` label used by the manifest and the source registry
    pub fn data_type(&self) -> &'static str {
        match self {
            FactTable::Prices => "prices",
            FactTable::Demographics => "demographics",
            FactTable::Income => "income",
        }
    }

    pub fn from_data_type(data_type: &str) -> Option<Self> {
        FactTable::ALL
            .into_iter()
            .find(|t| t.data_type() == data_type)
    }
}

impl fmt::Display for FactTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Sub-year period of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubPeriod {
    Annual,
    Quarter(u8),
    Month(u8),
}

impl SubPeriod {
    /// Storage key. Annual rows use the empty string rather than NULL so the
    /// composite unique index compares them as equal.
    pub fn as_key(&self) -> String {
        match self {
            SubPeriod::Annual => String::new(),
            SubPeriod::Quarter(q) => format!("Q{}", q),
            SubPeriod::Month(m) => format!("M{:02}", m),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            return Some(SubPeriod::Annual);
        }
        let mut chars = key.chars();
        let kind = chars.next()?;
        let n: u8 = chars.as_str().parse().ok()?;
        match kind {
            'Q' if (1..=4).contains(&n) => Some(SubPeriod::Quarter(n)),
            'M' if (1..=12).contains(&n) => Some(SubPeriod::Month(n)),
            _ => None,
        }
    }
}

/// The reconciliation key: two rows are duplicates only if all five fields match
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactKey {
    pub neighborhood_id: NeighborhoodId,
    pub year: i32,
    pub sub_period: SubPeriod,
    pub dataset_id: String,
    pub source: String,
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(neighborhood={}, year={}, period={:?}, dataset_id={}, source={})",
            self.neighborhood_id,
            self.year,
            self.sub_period.as_key(),
            self.dataset_id,
            self.source
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceMetrics {
    /// Euros per square meter (sale) or per square meter and month (rent)
    pub price_m2: Option<f64>,
    pub price_total: Option<f64>,
    pub transactions: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemographicMetrics {
    pub population: Option<i64>,
    pub households: Option<i64>,
    /// Share of foreign-born residents, 0-100
    pub pct_foreign: Option<f64>,
    pub mean_age: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeMetrics {
    pub household_income_eur: Option<f64>,
    pub income_per_capita_eur: Option<f64>,
    /// Disposable income index (city = 100)
    pub income_index: Option<f64>,
}

/// Metric payload of a fact row; the variant fixes the destination table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum FactMetrics {
    Prices(PriceMetrics),
    Demographics(DemographicMetrics),
    Income(IncomeMetrics),
}

impl FactMetrics {
    pub fn table(&self) -> FactTable {
        match self {
            FactMetrics::Prices(_) => FactTable::Prices,
            FactMetrics::Demographics(_) => FactTable::Demographics,
            FactMetrics::Income(_) => FactTable::Income,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FactMetrics::Prices(m) => {
                m.price_m2.is_none() && m.price_total.is_none() && m.transactions.is_none()
            }
            FactMetrics::Demographics(m) => {
                m.population.is_none()
                    && m.households.is_none()
                    && m.pct_foreign.is_none()
                    && m.mean_age.is_none()
            }
            FactMetrics::Income(m) => {
                m.household_income_eur.is_none()
                    && m.income_per_capita_eur.is_none()
                    && m.income_index.is_none()
            }
        }
    }
}

/// One observed indicator value for one neighborhood and period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub key: FactKey,
    pub metrics: FactMetrics,
}

impl FactRow {
    pub fn table(&self) -> FactTable {
        self.metrics.table()
    }
}

/// A fact row as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFact {
    pub row: FactRow,
    pub run_id: RunId,
    pub loaded_at: DateTime<Utc>,
}

/// A set of prepared fact rows destined for one fact table
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub table: FactTable,
    /// Source label of the preparer that produced the frame
    pub source: String,
    pub rows: Vec<FactRow>,
}

impl Frame {
    pub fn new(table: FactTable, source: impl Into<String>) -> Self {
        Self {
            table,
            source: source.into(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_period_keys() {
        assert_eq!(SubPeriod::Annual.as_key(), "");
        assert_eq!(SubPeriod::Quarter(3).as_key(), "Q3");
        assert_eq!(SubPeriod::Month(7).as_key(), "M07");

        assert_eq!(SubPeriod::from_key(""), Some(SubPeriod::Annual));
        assert_eq!(SubPeriod::from_key("Q4"), Some(SubPeriod::Quarter(4)));
        assert_eq!(SubPeriod::from_key("M12"), Some(SubPeriod::Month(12)));
        assert_eq!(SubPeriod::from_key("Q5"), None);
        assert_eq!(SubPeriod::from_key("X1"), None);
    }

    #[test]
    fn test_table_data_type_mapping() {
        for table in FactTable::ALL {
            assert_eq!(FactTable::from_data_type(table.data_type()), Some(table));
        }
        assert_eq!(FactTable::from_data_type("weather"), None);
    }

    #[test]
    fn test_empty_metrics() {
        assert!(FactMetrics::Prices(PriceMetrics::default()).is_empty());
        assert!(!FactMetrics::Income(IncomeMetrics {
            income_index: Some(101.2),
            ..Default::default()
        })
        .is_empty());
    }
}
