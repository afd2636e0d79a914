//! Output seam: `VTK`/summary text writing is a named out-of-scope
//! collaborator, so this module exposes the shape a real writer would
//! consume rather than a file-format implementation.
//!
//! `SUMMARY.out`'s column set is fixed at setup and rows are appended
//! after each successful step; `FastReview.out` is a per-step wide record
//! of `TIME, dt, dPmax, dVmax, dSmax, dNmax, CFL`. `RPT.out`/`grid<k>.vtk`
//! periodic snapshots are not modeled here since they sample `Bulk`
//! directly rather than flowing through the per-step record types below.

use crate::method::MaxChanges;

/// One `FastReview.out` row.
#[derive(Debug, Clone, Copy)]
pub struct FastReviewRow {
    pub time_days: f64,
    pub dt_days: f64,
    pub d_p_max: f64,
    pub d_v_max: f64,
    pub d_s_max: f64,
    pub d_n_max: f64,
    pub cfl: f64,
}

impl FastReviewRow {
    pub fn from_changes(time_days: f64, dt_days: f64, changes: MaxChanges, cfl: f64) -> Self {
        FastReviewRow {
            time_days,
            dt_days,
            d_p_max: changes.d_p_max,
            d_v_max: changes.d_v_max,
            d_s_max: changes.d_s_max,
            d_n_max: changes.d_n_max,
            cfl,
        }
    }
}

/// One `SUMMARY.out` row: field totals plus per-well rate/BHP columns,
/// the column set a `SUMMARY` keyword selection would have fixed at setup.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub time_days: f64,
    pub field_production_rate: Vec<f64>,
    pub field_injection_rate: Vec<f64>,
    pub well_bhp: Vec<(String, f64)>,
}

/// The seam a `SUMMARY.out`/`FastReview.out`/`grid<k>.vtk` writer plugs
/// into: fixed column set established once, rows appended per step.
pub trait OutputSink {
    fn write_fast_review(&mut self, row: FastReviewRow);
    fn write_summary(&mut self, row: SummaryRow);
}

/// Discards every row — the default when no output collaborator is wired
/// up (e.g. during a library-only integration test run).
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_fast_review(&mut self, _row: FastReviewRow) {}
    fn write_summary(&mut self, _row: SummaryRow) {}
}

/// Buffers every row in memory, for tests and for hosts (the `wasm`
/// facade) that want to hand rows back to the caller instead of writing a
/// file.
#[derive(Debug, Default)]
pub struct InMemorySink {
    pub fast_review: Vec<FastReviewRow>,
    pub summary: Vec<SummaryRow>,
}

impl OutputSink for InMemorySink {
    fn write_fast_review(&mut self, row: FastReviewRow) {
        self.fast_review.push(row);
    }
    fn write_summary(&mut self, row: SummaryRow) {
        self.summary.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_keeps_rows_in_append_order() {
        let mut sink = InMemorySink::default();
        sink.write_fast_review(FastReviewRow::from_changes(1.0, 1.0, MaxChanges::default(), 0.1));
        sink.write_fast_review(FastReviewRow::from_changes(2.0, 1.0, MaxChanges::default(), 0.2));
        assert_eq!(sink.fast_review.len(), 2);
        assert_eq!(sink.fast_review[1].time_days, 2.0);
    }
}
