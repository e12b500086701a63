//! Table rendering for command output.

use ledgerline_core::projection::{ProjectionStatus, ReplayReport};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Projection")]
    name: String,
    #[tabled(rename = "Rows")]
    rows: i64,
    #[tabled(rename = "Last updated")]
    last_updated: String,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Projection")]
    projection: String,
    #[tabled(rename = "Batches")]
    batches: u64,
    #[tabled(rename = "Applied")]
    applied: u64,
    #[tabled(rename = "Skipped (erased)")]
    skipped_erased: u64,
    #[tabled(rename = "Last position")]
    last_position: i64,
}

/// Renders projection health as a table.
#[must_use]
pub fn status_table(statuses: &[ProjectionStatus]) -> String {
    let rows = statuses.iter().map(|s| StatusRow {
        name: s.name.clone(),
        rows: s.rows,
        last_updated: s
            .last_updated
            .map_or_else(|| "never".to_owned(), |at| at.to_rfc3339()),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Renders replay outcomes as a table.
#[must_use]
pub fn report_table(reports: &[ReplayReport]) -> String {
    let rows = reports.iter().map(|r| ReportRow {
        projection: r.projection.clone(),
        batches: r.batches,
        applied: r.applied,
        skipped_erased: r.skipped_erased,
        last_position: r.last_position,
    });
    Table::new(rows).with(Style::rounded()).to_string()
}
