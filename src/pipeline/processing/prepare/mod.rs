//! Fact preparation: turns one raw table into typed fact rows for one fact table.
//!
//! The generic [`FactPreparer`] handles what every source shares (year and period
//! parsing, provenance, territory resolution). Metric coercion is delegated to a
//! [`DomainPreparer`] per fact table.

pub mod demographics;
pub mod income;
pub mod prices;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;
use tracing::{debug, info, instrument, warn};

use crate::constants::{MAX_YEAR, MIN_YEAR};
use crate::domain::{FactKey, FactMetrics, FactRow, FactTable, Frame, NeighborhoodId, SubPeriod};
use crate::error::{EtlError, Result};
use crate::metrics::{PrepareMetrics, TerritoryMetrics};
use crate::pipeline::ingestion::raw_reader::{parse_integer, parse_number};
use crate::pipeline::ingestion::{DatasetSpec, PeriodKind, RawRow, RawTable, SourceSpec};
use crate::pipeline::processing::territory::{Resolution, TerritoryResolver};

pub use demographics::DemographicsPreparer;
pub use income::IncomePreparer;
pub use prices::PricesPreparer;

/// Metric fields a source spec may map for a fact table
pub fn metric_fields(table: FactTable) -> &'static [&'static str] {
    match table {
        FactTable::Prices => prices::FIELDS,
        FactTable::Demographics => demographics::FIELDS,
        FactTable::Income => income::FIELDS,
    }
}

/// Domain-specific metric coercion for one fact table
pub trait DomainPreparer: Send + Sync {
    fn table(&self) -> FactTable;

    /// Build the typed metric payload. Values that violate domain rules are nulled
    /// and counted in `stats`.
    fn build(&self, cells: &MetricCells<'_>, stats: &mut PrepareStats) -> FactMetrics;
}

/// Registry of the built-in domain preparers
pub struct PreparerRegistry {
    preparers: HashMap<FactTable, Box<dyn DomainPreparer>>,
}

impl Default for PreparerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PreparerRegistry {
    pub fn new() -> Self {
        let mut preparers: HashMap<FactTable, Box<dyn DomainPreparer>> = HashMap::new();
        preparers.insert(FactTable::Prices, Box::new(PricesPreparer));
        preparers.insert(FactTable::Demographics, Box::new(DemographicsPreparer));
        preparers.insert(FactTable::Income, Box::new(IncomePreparer));
        Self { preparers }
    }

    pub fn get(&self, table: FactTable) -> Option<&dyn DomainPreparer> {
        self.preparers.get(&table).map(|p| p.as_ref())
    }
}

/// Raw metric cells of one row, keyed by domain field name
pub struct MetricCells<'a> {
    cells: BTreeMap<&'a str, Option<&'a str>>,
}

impl<'a> MetricCells<'a> {
    pub fn new(cells: BTreeMap<&'a str, Option<&'a str>>) -> Self {
        Self { cells }
    }

    pub fn raw(&self, field: &str) -> Option<&'a str> {
        self.cells.get(field).copied().flatten()
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.raw(field).and_then(parse_number)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.raw(field).and_then(parse_integer)
    }
}

/// Null a value outside `range`, counting the coercion
pub(crate) fn within(
    value: Option<f64>,
    range: RangeInclusive<f64>,
    field: &'static str,
    stats: &mut PrepareStats,
) -> Option<f64> {
    match value {
        Some(v) if !range.contains(&v) => {
            debug!(field, value = v, "Out-of-range metric coerced to null");
            *stats.coerced.entry(field.to_string()).or_default() += 1;
            None
        }
        other => other,
    }
}

/// Null a value that is not strictly positive, counting the coercion
pub(crate) fn positive(value: Option<f64>, field: &'static str, stats: &mut PrepareStats) -> Option<f64> {
    match value {
        Some(v) if v <= 0.0 => {
            debug!(field, value = v, "Non-positive metric coerced to null");
            *stats.coerced.entry(field.to_string()).or_default() += 1;
            None
        }
        other => other,
    }
}

/// Null a negative count, counting the coercion
pub(crate) fn non_negative(value: Option<i64>, field: &'static str, stats: &mut PrepareStats) -> Option<i64> {
    match value {
        Some(v) if v < 0 => {
            debug!(field, value = v, "Negative count coerced to null");
            *stats.coerced.entry(field.to_string()).or_default() += 1;
            None
        }
        other => other,
    }
}

/// Per-source preparation counters, carried into the run summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareStats {
    pub rows_read: usize,
    pub prepared: usize,
    /// Rows that reached territory resolution
    pub territory_attempts: usize,
    /// Resolution method -> rows
    pub resolutions: BTreeMap<String, usize>,
    pub unresolved: usize,
    /// Original territory string -> occurrences
    pub unresolved_names: BTreeMap<String, usize>,
    pub skipped_bad_year: usize,
    pub skipped_bad_period: usize,
    pub skipped_no_dataset: usize,
    pub skipped_empty_metrics: usize,
    /// Metric field -> values nulled by domain rules
    pub coerced: BTreeMap<String, usize>,
    /// Years present in the prepared rows
    pub years: BTreeSet<i32>,
}

impl PrepareStats {
    pub fn skipped(&self) -> usize {
        self.skipped_bad_year
            + self.skipped_bad_period
            + self.skipped_no_dataset
            + self.skipped_empty_metrics
            + self.unresolved
    }
}

/// Output of preparing one source
#[derive(Debug, Clone)]
pub struct PreparedSource {
    pub frame: Frame,
    pub stats: PrepareStats,
}

struct Columns {
    territory: usize,
    code: Option<usize>,
    year: usize,
    period: Option<(PeriodKind, usize)>,
    dataset: Option<usize>,
    source: Option<usize>,
    metrics: Vec<(String, usize)>,
}

/// Applies one [`SourceSpec`] to a raw table
pub struct FactPreparer<'a> {
    spec: &'a SourceSpec,
    table: FactTable,
    domain: &'a dyn DomainPreparer,
}

impl<'a> FactPreparer<'a> {
    pub fn new(spec: &'a SourceSpec, registry: &'a PreparerRegistry) -> Result<Self> {
        let table = spec.table()?;
        let domain = registry.get(table).ok_or_else(|| {
            EtlError::Config(format!("No preparer registered for {}", table.data_type()))
        })?;
        Ok(Self {
            spec,
            table,
            domain,
        })
    }

    fn columns(&self, raw: &RawTable) -> Result<Columns> {
        let missing = raw.missing_columns(&self.spec.required_columns());
        if !missing.is_empty() {
            return Err(EtlError::SchemaMismatch {
                source_label: self.spec.label(),
                missing,
            });
        }
        // Presence was checked above
        let col = |name: &str| raw.column(name).unwrap_or_default();
        Ok(Columns {
            territory: col(self.spec.territory_column.as_str()),
            code: self.spec.code_column.as_deref().map(col),
            year: col(self.spec.year_column.as_str()),
            period: self.spec.period.as_ref().map(|p| (p.kind, col(p.column.as_str()))),
            dataset: match &self.spec.dataset {
                DatasetSpec::Column { column, .. } => Some(col(column.as_str())),
                DatasetSpec::Fixed { .. } => None,
            },
            source: self.spec.source_column.as_deref().map(col),
            metrics: self
                .spec
                .metrics
                .iter()
                .map(|(field, column)| (field.clone(), col(column.as_str())))
                .collect(),
        })
    }

    #[instrument(skip_all, fields(source = %self.spec.source, data_type = %self.spec.data_type))]
    pub fn prepare(
        &self,
        raw: &RawTable,
        resolver: &mut TerritoryResolver<'_>,
    ) -> Result<PreparedSource> {
        let columns = self.columns(raw)?;
        let mut frame = Frame::new(self.table, self.spec.source.clone());
        let mut stats = PrepareStats::default();

        for row in raw.rows() {
            stats.rows_read += 1;
            if let Some(fact) = self.prepare_row(&row, &columns, resolver, &mut stats) {
                stats.years.insert(fact.key.year);
                frame.rows.push(fact);
            }
        }
        stats.prepared = frame.len();

        for (name, count) in &stats.unresolved_names {
            warn!(
                source = %self.spec.label(),
                territory = %name,
                occurrences = count,
                "Unresolved territory name"
            );
        }
        for (field, count) in &stats.coerced {
            warn!(source = %self.spec.label(), field = %field, count, "Metric values coerced to null");
        }
        PrepareMetrics::record_source(&stats);

        info!(
            rows_read = stats.rows_read,
            prepared = stats.prepared,
            unresolved = stats.unresolved,
            skipped = stats.skipped(),
            "Source prepared"
        );
        Ok(PreparedSource { frame, stats })
    }

    fn prepare_row(
        &self,
        row: &RawRow<'_>,
        columns: &Columns,
        resolver: &mut TerritoryResolver<'_>,
        stats: &mut PrepareStats,
    ) -> Option<FactRow> {
        let year = match row.get(columns.year).and_then(parse_integer) {
            Some(y) if (MIN_YEAR as i64..=MAX_YEAR as i64).contains(&y) => y as i32,
            _ => {
                stats.skipped_bad_year += 1;
                return None;
            }
        };

        let sub_period = match columns.period {
            None => SubPeriod::Annual,
            Some((kind, idx)) => match row.get(idx).and_then(|raw| parse_period(kind, raw)) {
                Some(p) => p,
                None => {
                    stats.skipped_bad_period += 1;
                    return None;
                }
            },
        };

        let Some(dataset_id) = self.dataset_id(row, columns) else {
            stats.skipped_no_dataset += 1;
            return None;
        };

        let source = columns
            .source
            .and_then(|idx| row.get(idx))
            .unwrap_or(self.spec.source.as_str())
            .to_string();

        stats.territory_attempts += 1;
        let resolution = self.resolve_territory(row, columns, resolver);
        TerritoryMetrics::record_resolution(resolution.method());
        *stats
            .resolutions
            .entry(resolution.method().to_string())
            .or_default() += 1;
        let Some(neighborhood_id) = resolution.id() else {
            stats.unresolved += 1;
            let original = row.get(columns.territory).unwrap_or("<empty>");
            *stats
                .unresolved_names
                .entry(original.to_string())
                .or_default() += 1;
            return None;
        };

        let cells = MetricCells::new(
            columns
                .metrics
                .iter()
                .map(|(field, idx)| (field.as_str(), row.get(*idx)))
                .collect(),
        );
        let metrics = self.domain.build(&cells, stats);
        if metrics.is_empty() {
            stats.skipped_empty_metrics += 1;
            return None;
        }

        Some(FactRow {
            key: FactKey {
                neighborhood_id,
                year,
                sub_period,
                dataset_id,
                source,
            },
            metrics,
        })
    }

    fn dataset_id(&self, row: &RawRow<'_>, columns: &Columns) -> Option<String> {
        match &self.spec.dataset {
            DatasetSpec::Fixed { fixed } => Some(fixed.clone()),
            DatasetSpec::Column { map, .. } => {
                let raw = row.get(columns.dataset?)?;
                Some(map.get(raw).cloned().unwrap_or_else(|| raw.to_string()))
            }
        }
    }

    /// A parseable code column wins; otherwise the name goes through the resolver
    fn resolve_territory(
        &self,
        row: &RawRow<'_>,
        columns: &Columns,
        resolver: &mut TerritoryResolver<'_>,
    ) -> Resolution {
        if let Some(code) = columns
            .code
            .and_then(|idx| row.get(idx))
            .and_then(parse_integer)
            .filter(|c| *c > 0 && *c <= u32::MAX as i64)
        {
            return Resolution::Code {
                id: NeighborhoodId(code as u32),
            };
        }
        resolver.resolve_name(row.get(columns.territory))
    }
}

/// Parse a quarter or month label ("2", "Q2", "T2", "2n trimestre", "M07",
/// "2020-T3"). The first run of one or two digits is the period number, so a
/// year embedded in the label is passed over.
pub fn parse_period(kind: PeriodKind, raw: &str) -> Option<SubPeriod> {
    let digits = raw
        .split(|c: char| !c.is_ascii_digit())
        .find(|run| !run.is_empty() && run.len() <= 2)?;
    let n: u8 = digits.parse().ok()?;
    match kind {
        PeriodKind::Quarter if (1..=4).contains(&n) => Some(SubPeriod::Quarter(n)),
        PeriodKind::Month if (1..=12).contains(&n) => Some(SubPeriod::Month(n)),
        _ => None,
    }
}
