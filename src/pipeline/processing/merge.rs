//! Deduplication across prepared frames of one fact table.
//!
//! Rows are deduplicated strictly on the five-field reconciliation key. On a
//! collision the row from the highest-priority source wins; rows are never blended.

use std::collections::HashSet;
use tracing::{debug, info, instrument};

use crate::constants::{TAG_JOINER, TAG_SEPARATORS};
use crate::domain::{FactKey, FactRow, FactTable, Frame, NeighborhoodId, SubPeriod};
use crate::error::{EtlError, Result};
use crate::metrics::MergeMetrics;

/// Canonical form of a possibly composite provenance tag.
///
/// `"portal+ine"`, `"ine | portal"` and `"ine;portal;ine"` all become `"ine|portal"`.
pub fn sanitize_tag(tag: &str) -> String {
    let mut parts: Vec<&str> = tag
        .split(TAG_SEPARATORS)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    parts.sort_unstable();
    parts.dedup();
    parts.join(TAG_JOINER)
}

/// Outcome of merging the frames of one fact table
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub frame: Frame,
    pub input_rows: usize,
    /// Rows dropped as exact key duplicates
    pub duplicates: usize,
    /// Rows whose provenance tags changed under sanitation
    pub sanitized_tags: usize,
}

pub struct MergeEngine {
    priority: Vec<String>,
}

impl MergeEngine {
    /// `priority` lists source labels from most to least trusted
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    /// Position in the priority list; unlisted sources rank after every listed one
    fn rank(&self, source: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == source)
            .unwrap_or(self.priority.len())
    }

    #[instrument(skip_all, fields(table = %table))]
    pub fn merge(&self, table: FactTable, frames: Vec<Frame>) -> Result<MergeOutcome> {
        if let Some(stray) = frames.iter().find(|f| f.table != table) {
            return Err(EtlError::Config(format!(
                "Frame from '{}' for {} passed to the {} merge",
                stray.source, stray.table, table
            )));
        }

        let mut sanitized_tags = 0;
        let mut candidates: Vec<(usize, &str, usize, usize, FactRow)> = Vec::new();
        for (frame_idx, frame) in frames.iter().enumerate() {
            let rank = self.rank(&frame.source);
            for (row_idx, row) in frame.rows.iter().enumerate() {
                let mut row = row.clone();
                let dataset_id = sanitize_tag(&row.key.dataset_id);
                let mut source = sanitize_tag(&row.key.source);
                if source.is_empty() {
                    // A tag made only of separators carries no provenance
                    source = sanitize_tag(&frame.source);
                }
                if dataset_id != row.key.dataset_id || source != row.key.source {
                    sanitized_tags += 1;
                }
                row.key.dataset_id = dataset_id;
                row.key.source = source;
                candidates.push((rank, frame.source.as_str(), frame_idx, row_idx, row));
            }
        }
        let input_rows = candidates.len();

        candidates.sort_by(|a, b| (a.0, a.1, a.2, a.3).cmp(&(b.0, b.1, b.2, b.3)));

        let mut seen: HashSet<FactKey> = HashSet::with_capacity(input_rows);
        let mut merged = Frame::new(table, merged_source_label(&frames));
        let mut duplicates = 0;
        for (_, producer, _, _, row) in candidates {
            if seen.contains(&row.key) {
                debug!(key = %row.key, producer, "Duplicate reconciliation key dropped");
                duplicates += 1;
                continue;
            }
            seen.insert(row.key.clone());
            merged.rows.push(row);
        }

        check_no_loss(table, &frames, &merged)?;

        MergeMetrics::record_merge(input_rows, merged.len(), duplicates);
        info!(
            input_rows,
            output_rows = merged.len(),
            duplicates,
            sanitized_tags,
            "Frames merged"
        );

        Ok(MergeOutcome {
            frame: merged,
            input_rows,
            duplicates,
            sanitized_tags,
        })
    }
}

fn merged_source_label(frames: &[Frame]) -> String {
    let labels: Vec<&str> = frames.iter().map(|f| f.source.as_str()).collect();
    sanitize_tag(&labels.join(TAG_JOINER))
}

type Observation = (NeighborhoodId, i32, SubPeriod, String);

fn observations<'a>(rows: impl Iterator<Item = &'a FactRow>) -> HashSet<Observation> {
    rows.map(|r| {
        (
            r.key.neighborhood_id,
            r.key.year,
            r.key.sub_period,
            sanitize_tag(&r.key.dataset_id),
        )
    })
    .collect()
}

/// The merge may only drop exact key duplicates, so the set of distinct
/// (neighborhood, year, period, dataset) observations must survive intact.
fn check_no_loss(table: FactTable, input: &[Frame], output: &Frame) -> Result<()> {
    let before = observations(input.iter().flat_map(|f| f.rows.iter()));
    let after = observations(output.rows.iter());
    if !before.is_subset(&after) {
        return Err(EtlError::MergeInvariant {
            table: table.table_name().to_string(),
            before: before.len(),
            after: after.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FactMetrics, PriceMetrics};

    fn price_row(nb: u32, year: i32, dataset: &str, source: &str, price: f64) -> FactRow {
        FactRow {
            key: FactKey {
                neighborhood_id: NeighborhoodId(nb),
                year,
                sub_period: SubPeriod::Annual,
                dataset_id: dataset.to_string(),
                source: source.to_string(),
            },
            metrics: FactMetrics::Prices(PriceMetrics {
                price_m2: Some(price),
                ..Default::default()
            }),
        }
    }

    fn frame(source: &str, rows: Vec<FactRow>) -> Frame {
        Frame {
            table: FactTable::Prices,
            source: source.to_string(),
            rows,
        }
    }

    fn price_of(row: &FactRow) -> Option<f64> {
        match &row.metrics {
            FactMetrics::Prices(m) => m.price_m2,
            _ => None,
        }
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("portal+ine"), "ine|portal");
        assert_eq!(sanitize_tag(" ine | portal "), "ine|portal");
        assert_eq!(sanitize_tag("ine;portal;ine"), "ine|portal");
        assert_eq!(sanitize_tag("portal"), "portal");
        assert_eq!(sanitize_tag(""), "");
    }

    #[test]
    fn test_exact_duplicate_keeps_priority_source() {
        // Same key, differing only in decimal precision
        let engine = MergeEngine::new(vec!["portal".into(), "mirror".into()]);
        let frames = vec![
            frame("mirror", vec![price_row(31, 2020, "sale_m2", "portal", 4512.0)]),
            frame("portal", vec![price_row(31, 2020, "sale_m2", "portal", 4512.34)]),
        ];
        let out = engine.merge(FactTable::Prices, frames).unwrap();
        assert_eq!(out.frame.len(), 1);
        assert_eq!(out.duplicates, 1);
        assert_eq!(price_of(&out.frame.rows[0]), Some(4512.34));
    }

    #[test]
    fn test_distinct_datasets_both_survive() {
        let engine = MergeEngine::new(vec!["portal".into()]);
        let frames = vec![frame(
            "portal",
            vec![
                price_row(31, 2020, "sale_m2", "portal", 4512.0),
                price_row(31, 2020, "rent_m2", "portal", 15.2),
            ],
        )];
        let out = engine.merge(FactTable::Prices, frames).unwrap();
        assert_eq!(out.frame.len(), 2);
        assert_eq!(out.duplicates, 0);
    }

    #[test]
    fn test_composite_tags_in_different_order_collide() {
        let engine = MergeEngine::new(vec![]);
        let frames = vec![
            frame("a", vec![price_row(1, 2019, "sale_m2", "portal+ine", 10.0)]),
            frame("b", vec![price_row(1, 2019, "sale_m2", "ine|portal", 11.0)]),
        ];
        let out = engine.merge(FactTable::Prices, frames).unwrap();
        assert_eq!(out.frame.len(), 1);
        assert_eq!(out.sanitized_tags, 1);
        assert_eq!(out.frame.rows[0].key.source, "ine|portal");
        // Both unlisted: ordered by producer label, then arrival
        assert_eq!(price_of(&out.frame.rows[0]), Some(10.0));
    }

    #[test]
    fn test_separator_only_source_falls_back_to_producer() {
        let engine = MergeEngine::new(vec!["portal".into()]);
        let frames = vec![frame(
            "portal",
            vec![
                price_row(7, 2021, "sale_m2", "|", 10.0),
                price_row(7, 2021, "sale_m2", "portal", 11.0),
            ],
        )];
        let out = engine.merge(FactTable::Prices, frames).unwrap();
        assert_eq!(out.frame.len(), 1);
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.sanitized_tags, 1);
        assert_eq!(out.frame.rows[0].key.source, "portal");
        assert_eq!(price_of(&out.frame.rows[0]), Some(10.0));
    }

    #[test]
    fn test_unlisted_sources_rank_after_listed() {
        let engine = MergeEngine::new(vec!["idescat".into()]);
        let frames = vec![
            frame("aaa_unlisted", vec![price_row(2, 2020, "d", "shared", 1.0)]),
            frame("idescat", vec![price_row(2, 2020, "d", "shared", 2.0)]),
        ];
        let out = engine.merge(FactTable::Prices, frames).unwrap();
        assert_eq!(price_of(&out.frame.rows[0]), Some(2.0));
    }

    #[test]
    fn test_merge_is_independent_of_arrival_order() {
        let engine = MergeEngine::new(vec!["portal".into(), "mirror".into()]);
        let a = frame("portal", vec![price_row(5, 2020, "d", "x", 1.0)]);
        let b = frame("mirror", vec![price_row(5, 2020, "d", "x", 2.0)]);
        let forward = engine.merge(FactTable::Prices, vec![a.clone(), b.clone()]).unwrap();
        let backward = engine.merge(FactTable::Prices, vec![b, a]).unwrap();
        assert_eq!(forward.frame.rows, backward.frame.rows);
    }

    #[test]
    fn test_frame_for_wrong_table_is_rejected() {
        let engine = MergeEngine::new(vec![]);
        let mut stray = frame("x", vec![]);
        stray.table = FactTable::Income;
        assert!(engine.merge(FactTable::Prices, vec![stray]).is_err());
    }
}
