//! Error taxonomy and the `Diagnostics` message collaborator.
//!
//! Failures split into four classes, only two of which cross the core
//! boundary as Rust `Result`s: `Input` (malformed setup) and `Invariant`
//! (unrecoverable, e.g. zero pore volume, NaN in the Jacobian). Transient
//! numerical failures and well-constraint switches are encoded as small
//! return codes from `Check*`/`FinishNr`-style routines, never exceptions —
//! see `bulk::CheckReport`, `well::CheckPOutcome`, `method::ConvergeOutcome`.

use std::fmt;
use thiserror::Error;

/// Abort-class and input-class failures.
#[derive(Error, Debug)]
pub enum OcpError {
    #[error("pore volume at bulk {bulk} is non-positive ({vp_rb})")]
    NonPositivePoreVolume { bulk: usize, vp_rb: f64 },

    #[error("cell {bulk} has no remaining fluid: sum(Ni) <= 0")]
    EmptyCell { bulk: usize },

    #[error("assembled {matrix} contains a non-finite entry at row {row}")]
    NonFiniteJacobian { matrix: &'static str, row: usize },

    #[error("time step fell below timeMin ({dt} < {time_min}) while retrying: {reason}")]
    TimeStepBelowMinimum {
        dt: f64,
        time_min: f64,
        reason: String,
    },

    #[error("missing required PVT/SAT table for region {region} ({table})")]
    MissingTable { region: usize, table: &'static str },

    #[error("unsupported phase/mixture combination requested: {0}")]
    UnsupportedMixture(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("linear solver backend failure: {0}")]
    Solver(String),
}

/// Convenience alias for `Result<T, OcpError>`.
pub type OcpResult<T> = Result<T, OcpError>;

/// Severity of a recorded `Diagnostics` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Retry,
    Abort,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Retry => "RETRY",
            Severity::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// One recorded diagnostic message, stamped with the simulation time at
/// which it was raised.
#[derive(Debug, Clone)]
pub struct Record {
    pub time_days: f64,
    pub severity: Severity,
    pub message: String,
}

/// Explicit collaborator replacing the original `OCP_FUNCNAME` /
/// `OCP_ABORT` / `OCP_WARNING` global macros.
///
/// Owned by `Control` and injected wherever a driver needs to report a
/// retry, a well-mode switch, or an abort. Every message is both appended
/// to `history` (so tests can assert on it without parsing log text) and
/// forwarded to the `log` facade.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    history: Vec<Record>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, time_days: f64, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => log::info!("t={time_days:.6}d {message}"),
            Severity::Warn => log::warn!("t={time_days:.6}d {message}"),
            Severity::Retry => log::warn!("t={time_days:.6}d retry: {message}"),
            Severity::Abort => log::error!("t={time_days:.6}d ABORT: {message}"),
        }
        self.history.push(Record {
            time_days,
            severity,
            message,
        });
    }

    pub fn info(&mut self, time_days: f64, message: impl Into<String>) {
        self.record(time_days, Severity::Info, message);
    }

    pub fn warn(&mut self, time_days: f64, message: impl Into<String>) {
        self.record(time_days, Severity::Warn, message);
    }

    pub fn retry(&mut self, time_days: f64, message: impl Into<String>) {
        self.record(time_days, Severity::Retry, message);
    }

    pub fn abort(&mut self, time_days: f64, message: impl Into<String>) {
        self.record(time_days, Severity::Abort, message);
    }

    /// Full message history, oldest first.
    pub fn history(&self) -> &[Record] {
        &self.history
    }

    /// Count of messages at or above a given severity, for tests that only
    /// care "did a retry happen" without matching message text.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.history.iter().filter(|r| r.severity >= severity).count()
    }

    pub fn last(&self) -> Option<&Record> {
        self.history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_kept_in_order_and_counted_by_severity() {
        let mut diag = Diagnostics::new();
        diag.info(0.0, "setup complete");
        diag.retry(1.0, "CFL > 1, halving dt");
        diag.retry(1.0, "still too large, halving again");
        diag.warn(2.0, "well P1 switched to BHP control");

        assert_eq!(diag.history().len(), 4);
        assert_eq!(diag.count_at_least(Severity::Retry), 3);
        assert_eq!(diag.count_at_least(Severity::Abort), 0);
        assert_eq!(diag.last().unwrap().message, "well P1 switched to BHP control");
    }
}
