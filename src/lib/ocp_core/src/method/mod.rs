//! Method drivers: the two time-stepping state machines (`Impes`, `Fim`)
//! that own the assemble → solve → check → commit-or-retry loop over a
//! `Bulk` + `Connections` + `[Well]` trio. Both share `StepOutcome`/
//! `MaxChanges` and the retry policy implemented on `Control`.

pub mod fim;
pub mod impes;

use crate::bulk::Bulk;
use crate::control::Control;
use crate::error::OcpError;
use crate::well::Well;

/// Result of one attempted step (which may have retried internally any
/// number of times before settling).
#[derive(Debug)]
pub enum StepOutcome {
    Committed,
    /// The step could not be completed: a retry was exhausted (`dt` would
    /// have to fall below `timeMin`), an invariant broke (empty cell,
    /// non-positive pore volume, a non-finite Jacobian entry), or the
    /// linear solver itself failed. The carried `OcpError` is the true
    /// cause; `Reservoir::step` surfaces it to the caller as-is instead of
    /// collapsing every cause into one generic message.
    Fatal(OcpError),
}

/// Turns a `Control::halve_dt`/`cut_dt_for_newton` failure (a plain
/// `timeMin` message) into the `OcpError` variant a driver's `Fatal`
/// carries.
pub fn time_step_below_min(control: &Control, message: String) -> OcpError {
    OcpError::TimeStepBelowMinimum {
        dt: control.dt,
        time_min: control.time_params().time_min,
        reason: message,
    }
}

/// The per-step maximum-change metrics `Control::predict_next_dt` and
/// `Control::predict_next_dt_fim` consume.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxChanges {
    pub d_p_max: f64,
    pub d_s_max: f64,
    pub d_n_max: f64,
    pub d_v_max: f64,
}

/// Snapshots every well's BHP/mode alongside `Bulk`'s own commit/restore,
/// so a retry rolls back both collaborators together.
pub fn snapshot_wells(wells: &[Well]) -> Vec<(f64, crate::well::WellOpMode)> {
    wells.iter().map(|w| (w.bhp, w.mode)).collect()
}

pub fn restore_wells(wells: &mut [Well], snapshot: &[(f64, crate::well::WellOpMode)]) {
    for (well, (bhp, mode)) in wells.iter_mut().zip(snapshot) {
        well.bhp = *bhp;
        well.mode = *mode;
    }
}

/// `Ni += fluxes*dt` for every component in every cell, from a
/// connection-by-connection volumetric balance already turned into
/// per-cell component deltas by the caller.
pub fn apply_component_deltas(bulk: &mut Bulk, deltas: &[Vec<f64>]) {
    let nc = bulk.num_component();
    for (n, delta) in deltas.iter().enumerate() {
        let row = bulk.ni_row_mut(n);
        for c in 0..nc {
            row[c] += delta[c];
        }
    }
}

pub fn max_pressure_change(bulk: &Bulk, old_p: &[f64]) -> f64 {
    (0..bulk.num_cells())
        .map(|n| (bulk.pressure(n) - old_p[n]).abs())
        .fold(0.0, f64::max)
}
