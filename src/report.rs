//! Human-readable run summary printed by the CLI

use std::fmt::Write;

use crate::app::RunReport;
use crate::domain::{RunRecord, RunStatus};
use crate::pipeline::audit::SourceStatus;

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "✅",
        RunStatus::Partial => "⚠️ ",
        RunStatus::Failed => "❌",
        RunStatus::Running => "⏳",
    }
}

fn source_icon(status: SourceStatus) -> &'static str {
    match status {
        SourceStatus::Prepared => "✅",
        SourceStatus::Missing | SourceStatus::ExtractionFailed => "⚠️ ",
        SourceStatus::Unreadable | SourceStatus::SchemaMismatch => "❌",
    }
}

/// Render the per-run summary: sources, tables, gates and final status
pub fn render(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "\n📊 Reconciliation run {}", report.run_id);
    let _ = writeln!(out, "\n📥 Sources:");
    for source in &summary.sources {
        let _ = writeln!(
            out,
            "   {} {} [{:?}]",
            source_icon(source.status),
            source.label(),
            source.status
        );
        if source.status.is_available() {
            let stats = &source.stats;
            let _ = writeln!(
                out,
                "      rows read: {}, prepared: {}, unresolved: {}, skipped: {}",
                stats.rows_read,
                stats.prepared,
                stats.unresolved,
                stats.skipped()
            );
            if let Some(encoding) = &source.encoding {
                let _ = writeln!(out, "      encoding: {}", encoding);
            }
            for (name, count) in &stats.unresolved_names {
                let _ = writeln!(out, "      unresolved territory '{}' x{}", name, count);
            }
        }
        for warning in &source.warnings {
            let _ = writeln!(out, "      - {}", warning);
        }
    }

    let _ = writeln!(
        out,
        "\n🗺️  Territory: {} resolved of {} ({:.2}% unresolved)",
        summary.territory_attempts.saturating_sub(summary.unresolved),
        summary.territory_attempts,
        summary.unresolved_rate * 100.0
    );

    if !summary.tables.is_empty() {
        let _ = writeln!(out, "\n🗄️  Tables:");
        for (table, t) in &summary.tables {
            let written = match (&t.load, &t.error) {
                (Some(load), _) => format!(
                    "inserted {}, already present {}",
                    load.inserted, load.already_present
                ),
                (None, Some(e)) => format!("rolled back: {}", e),
                (None, None) => "not written".to_string(),
            };
            let _ = writeln!(
                out,
                "   {}: {} in, {} duplicates, {} valid, {} rejected ({:.2}%) -> {}",
                table,
                t.input_rows,
                t.duplicates,
                t.valid,
                t.rejected,
                t.rejected_rate * 100.0,
                written
            );
        }
    }

    if !summary.gate_breaches.is_empty() {
        let _ = writeln!(out, "\n🚫 Quality gates breached:");
        for breach in &summary.gate_breaches {
            let _ = writeln!(out, "   - {}", breach);
        }
    }
    if let Some(error) = &summary.error {
        let _ = writeln!(out, "\n❌ Error: {}", error);
    }

    let _ = writeln!(
        out,
        "\n{} Status: {} ({:.2}s)",
        status_icon(report.status),
        report.status,
        summary.elapsed_secs
    );
    out
}

/// One line per audit record for the `runs` command
pub fn render_run_line(record: &RunRecord) -> String {
    let finished = record
        .finished_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unfinished".to_string());
    format!(
        "{} {} {:<8} started {} finished {}",
        status_icon(record.status),
        record.run_id,
        record.status.as_str(),
        record.started_at.to_rfc3339(),
        finished
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FactTable, RunId};
    use crate::pipeline::audit::{RunSummary, SourceReport, TableReport};
    use crate::pipeline::storage::LoadOutcome;

    #[test]
    fn test_render_lists_sources_tables_and_status() {
        let mut prepared = SourceReport::new("prices", "portal", SourceStatus::Prepared);
        prepared.stats.rows_read = 4;
        prepared.stats.prepared = 3;
        prepared.stats.unresolved = 1;
        prepared.stats.territory_attempts = 4;
        prepared.stats
            .unresolved_names
            .insert("barri desconegut".to_string(), 1);
        let mut summary = RunSummary {
            sources: vec![
                prepared,
                SourceReport::new("income", "ine", SourceStatus::Missing),
            ],
            territory_attempts: 4,
            unresolved: 1,
            unresolved_rate: 0.25,
            ..Default::default()
        };
        summary.tables.insert(
            FactTable::Prices,
            TableReport {
                input_rows: 3,
                valid: 3,
                load: Some(LoadOutcome {
                    inserted: 3,
                    already_present: 0,
                }),
                ..Default::default()
            },
        );
        let text = render(&RunReport {
            run_id: RunId::generate(),
            status: RunStatus::Partial,
            summary,
        });

        assert!(text.contains("prices/portal"));
        assert!(text.contains("income/ine [Missing]"));
        assert!(text.contains("unresolved territory 'barri desconegut' x1"));
        assert!(text.contains("fact_prices: 3 in"));
        assert!(text.contains("inserted 3, already present 0"));
        assert!(text.contains("Status: partial"));
    }
}
