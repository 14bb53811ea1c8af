use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{FactKey, FactRow, FactTable, Frame, NeighborhoodDimension};
use crate::metrics::IntegrityMetrics;

/// Why a fact row failed referential integrity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The assigned neighborhood id is absent from the dimension snapshot
    UnknownNeighborhood,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub row: FactRow,
    pub reason: RejectionReason,
}

/// Valid and rejected rows of one fact table
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub table: FactTable,
    pub valid: Vec<FactRow>,
    pub rejected: Vec<RejectedRow>,
}

impl ValidationOutcome {
    pub fn total(&self) -> usize {
        self.valid.len() + self.rejected.len()
    }

    /// Share of rejected rows; an empty batch has rate 0
    pub fn rejected_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.rejected.len() as f64 / total as f64,
        }
    }

    pub fn rejected_keys(&self) -> impl Iterator<Item = &FactKey> {
        self.rejected.iter().map(|r| &r.row.key)
    }
}

/// Split a merged frame into rows whose neighborhood exists in the dimension and
/// rows that do not. Runs strictly before any write.
pub fn validate(frame: Frame, dimension: &NeighborhoodDimension) -> ValidationOutcome {
    let table = frame.table;
    let (valid, rejected): (Vec<FactRow>, Vec<FactRow>) = frame
        .rows
        .into_iter()
        .partition(|row| dimension.contains(row.key.neighborhood_id));

    let rejected: Vec<RejectedRow> = rejected
        .into_iter()
        .map(|row| {
            warn!(
                table = %table,
                key = %row.key,
                "Fact row rejected: neighborhood not in dimension"
            );
            RejectedRow {
                row,
                reason: RejectionReason::UnknownNeighborhood,
            }
        })
        .collect();

    IntegrityMetrics::record_validation(valid.len(), rejected.len());
    let outcome = ValidationOutcome {
        table,
        valid,
        rejected,
    };
    info!(
        table = %table,
        valid = outcome.valid.len(),
        rejected = outcome.rejected.len(),
        rejected_rate = outcome.rejected_rate(),
        "Referential integrity checked"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::sample_dimension;
    use crate::domain::{FactMetrics, IncomeMetrics, NeighborhoodId, SubPeriod};

    fn income_row(nb: u32) -> FactRow {
        FactRow {
            key: FactKey {
                neighborhood_id: NeighborhoodId(nb),
                year: 2021,
                sub_period: SubPeriod::Annual,
                dataset_id: "renda_disponible".into(),
                source: "opendata_bcn".into(),
            },
            metrics: FactMetrics::Income(IncomeMetrics {
                income_index: Some(100.0),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_unknown_neighborhood_is_rejected() {
        let frame = Frame {
            table: FactTable::Income,
            source: "opendata_bcn".into(),
            rows: vec![income_row(1), income_row(74), income_row(31), income_row(99)],
        };
        let outcome = validate(frame, &sample_dimension());
        assert_eq!(outcome.valid.len(), 2);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected_rate(), 0.5);
        let ids: Vec<u32> = outcome.rejected_keys().map(|k| k.neighborhood_id.0).collect();
        assert_eq!(ids, vec![74, 99]);
        assert!(outcome
            .rejected
            .iter()
            .all(|r| r.reason == RejectionReason::UnknownNeighborhood));
    }

    #[test]
    fn test_empty_dimension_rejects_everything() {
        let frame = Frame {
            table: FactTable::Income,
            source: "x".into(),
            rows: vec![income_row(1)],
        };
        let outcome = validate(frame, &NeighborhoodDimension::default());
        assert_eq!(outcome.rejected_rate(), 1.0);
    }

    #[test]
    fn test_empty_frame_has_zero_rate() {
        let outcome = validate(Frame::new(FactTable::Prices, "x"), &sample_dimension());
        assert_eq!(outcome.total(), 0);
        assert_eq!(outcome.rejected_rate(), 0.0);
    }
}
