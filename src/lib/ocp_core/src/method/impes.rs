//! IMPES (implicit pressure, explicit saturation) driver.
//!
//! ```text
//! prepare well, CFL estimate -> if cfl>1 then dt /= (cfl+1)
//! loop:
//!   assemble pressure system (Connection + Well), solve
//!   CheckP -> {ok | retry same dt | halve dt}
//!   compute fluxes; CFL recheck -> if >1 halve dt, restore, continue
//!   mass-conserve: Ni += fluxes*dt; CheckNi -> if negative halve dt, restore, continue
//!   update pore volume from rock(P); flash_by_Ni
//!   CheckVe(0.01) -> if not halve dt, restore, continue
//!   recompute kr, Pc, fluxes
//!   exit loop
//! rate integration, max-change metrics, commit snapshot
//! dt' = dt * min(c1, c2, c3, c4), clamped
//! ```
//!
//! The pressure system solved here is the classic IMPES linearization:
//! each connection's phase-summed volumetric flux is already affine in the
//! two cells' pressures once saturations/mobilities are frozen at the
//! current iterate (`Connection::phase_fluxes`'s `d_vol_dp_i/j` are exactly
//! that linearization's slope), so the Jacobian is just those slopes and
//! the residual is the frozen-state flux itself.

use std::time::Duration;

use nalgebra::DVector;

use crate::bulk::{Bulk, CheckNiOutcome};
use crate::connection::Connections;
use crate::control::Control;
use crate::error::OcpResult;
use crate::linear_system::{LinearSolver, LinearSystemBuilder, PcgSolver};
use crate::method::{self, time_step_below_min, MaxChanges, StepOutcome};
use crate::well::{CheckPOutcome, Well};

pub struct ImpesDriver {
    solver: Box<dyn LinearSolver>,
}

impl Default for ImpesDriver {
    fn default() -> Self {
        ImpesDriver { solver: Box::new(PcgSolver::default()) }
    }
}

impl ImpesDriver {
    pub fn new(solver: Box<dyn LinearSolver>) -> Self {
        ImpesDriver { solver }
    }

    /// Assembles and solves the pressure system, then writes the solution
    /// back into `bulk`'s per-cell pressure. Well perforations contribute
    /// their BHP-controlled or rate-controlled source term directly to the
    /// diagonal/RHS.
    fn solve_pressure(&self, bulk: &mut Bulk, connections: &Connections, wells: &[Well]) -> OcpResult<crate::linear_system::SolveReport> {
        let n = bulk.num_cells();
        let mut builder = LinearSystemBuilder::allocate(n);
        for conn in connections.iter() {
            builder.row_cap_plus(conn.bulk_i, 1);
            builder.row_cap_plus(conn.bulk_j, 1);
        }

        for conn in connections.iter() {
            let fluxes = connections.phase_fluxes(&conn, bulk);
            for pf in &fluxes {
                builder.add_entry(conn.bulk_i, conn.bulk_i, -pf.d_vol_dp_i);
                builder.add_entry(conn.bulk_i, conn.bulk_j, -pf.d_vol_dp_j);
                builder.add_entry(conn.bulk_j, conn.bulk_j, pf.d_vol_dp_j);
                builder.add_entry(conn.bulk_j, conn.bulk_i, pf.d_vol_dp_i);

                let constant = pf.volumetric - pf.d_vol_dp_i * bulk.pressure(conn.bulk_i) - pf.d_vol_dp_j * bulk.pressure(conn.bulk_j);
                builder.add_rhs(conn.bulk_i, -constant);
                builder.add_rhs(conn.bulk_j, constant);
            }
        }

        for well in wells {
            for perf in &well.perforations {
                if !perf.open {
                    continue;
                }
                let cell = perf.bulk_index;
                let kr = bulk.kr_pc(cell);
                let flash = bulk.flash_out(cell);
                let total_mobility: f64 = (0..flash.num_phase)
                    .map(|ph| if flash.phase_exist[ph] && flash.mu[ph] > 0.0 { kr.kr[ph] / flash.mu[ph] } else { 0.0 })
                    .sum();
                let trans = perf.well_index * perf.multiplier * total_mobility;
                match well.mode {
                    crate::well::WellOpMode::BhpControlled { bhp } => {
                        builder.add_entry(cell, cell, trans);
                        builder.add_rhs(cell, trans * (bhp + perf.d_g));
                    }
                    crate::well::WellOpMode::RateControlled { target_rate } => {
                        let signed = if well.is_injector() { target_rate } else { -target_rate };
                        builder.add_rhs(cell, signed);
                    }
                    crate::well::WellOpMode::Shut => {}
                }
            }
        }

        let system = builder.build();
        let x0 = DVector::from_iterator(n, (0..n).map(|i| bulk.pressure(i)));
        let (solution, report) = self.solver.solve(&system, &x0);
        for i in 0..n {
            bulk.set_pressure(i, solution[i]);
        }
        Ok(report)
    }

    /// One full IMPES step, retrying internally (via `control.halve_dt`)
    /// until every check passes or `dt` is promoted to a fatal abort.
    pub fn step(&self, bulk: &mut Bulk, connections: &Connections, wells: &mut Vec<Well>, control: &mut Control) -> StepOutcome {
        for well in wells.iter_mut() {
            let model = bulk.model_at(well.perforations.first().map(|p| p.bulk_index).unwrap_or(0));
            well.update_gravity_heads(bulk, model);
        }

        let cfl_estimate = connections.max_cfl_fraction(bulk, control.dt);
        if cfl_estimate > 1.0 {
            control.dt /= cfl_estimate + 1.0;
        }

        bulk.commit();
        let well_snapshot = method::snapshot_wells(wells);
        let old_p: Vec<f64> = (0..bulk.num_cells()).map(|n| bulk.pressure(n)).collect();
        let old_s: Vec<Vec<f64>> = (0..bulk.num_cells()).map(|n| bulk.flash_out(n).s.clone()).collect();

        let mut stats = crate::control::StepStats::default();

        loop {
            let solve_start = std::time::Instant::now();
            let report = match self.solve_pressure(bulk, connections, wells) {
                Ok(r) => r,
                Err(e) => return StepOutcome::Fatal(e),
            };
            crate::control::Control::record_linear_solve(&mut stats, report, solve_start.elapsed());
            stats.nr_iterations += 1;

            if !bulk.check_p() {
                if let Err(msg) = control.halve_dt("pressure went non-positive") {
                    return StepOutcome::Fatal(time_step_below_min(control, msg));
                }
                bulk.restore();
                method::restore_wells(wells, &well_snapshot);
                continue;
            }

            let mut mode_switched = false;
            for well in wells.iter_mut() {
                let cell = well.perforations.first().map(|p| p.bulk_index).unwrap_or(0);
                let model = bulk.model_at(cell);
                match well.check_p(bulk, model, bulk.num_component()) {
                    CheckPOutcome::Ok => {}
                    CheckPOutcome::ModeSwitched => mode_switched = true,
                    CheckPOutcome::HalveDt => {
                        if let Err(msg) = control.halve_dt("well perforation pressure collapsed") {
                            return StepOutcome::Fatal(time_step_below_min(control, msg));
                        }
                        bulk.restore();
                        method::restore_wells(wells, &well_snapshot);
                        return self.step(bulk, connections, wells, control);
                    }
                }
            }
            if mode_switched {
                continue;
            }

            if connections.max_cfl_fraction(bulk, control.dt) > 1.0 {
                if let Err(msg) = control.halve_dt("CFL exceeded 1 after pressure solve") {
                    return StepOutcome::Fatal(time_step_below_min(control, msg));
                }
                bulk.restore();
                method::restore_wells(wells, &well_snapshot);
                continue;
            }

            let nc = bulk.num_component();
            let mut deltas = vec![vec![0.0; nc]; bulk.num_cells()];
            for conn in connections.iter() {
                let flux = connections.component_fluxes(&conn, bulk);
                for c in 0..nc {
                    deltas[conn.bulk_i][c] -= flux[c] * control.dt;
                    deltas[conn.bulk_j][c] += flux[c] * control.dt;
                }
            }
            for well in wells.iter() {
                let cell = well.perforations.first().map(|p| p.bulk_index).unwrap_or(0);
                let model = bulk.model_at(cell);
                let rates = well.total_component_rates(bulk, model, nc);
                for perf in &well.perforations {
                    if !perf.open {
                        continue;
                    }
                    for c in 0..nc {
                        deltas[perf.bulk_index][c] -= rates[c] * control.dt / well.perforations.iter().filter(|p| p.open).count() as f64;
                    }
                }
            }
            method::apply_component_deltas(bulk, &deltas);

            if bulk.check_ni() == CheckNiOutcome::Retry {
                if let Err(msg) = control.halve_dt("negative moles exceeded the soft-reset threshold") {
                    return StepOutcome::Fatal(time_step_below_min(control, msg));
                }
                bulk.restore();
                method::restore_wells(wells, &well_snapshot);
                continue;
            }

            if let Err(e) = bulk.update_rock_pore_volume_all() {
                return StepOutcome::Fatal(e);
            }
            if let Err(e) = bulk.flash_all(false) {
                return StepOutcome::Fatal(e);
            }

            if !bulk.check_ve(0.01) {
                if let Err(msg) = control.halve_dt("volume-balance error exceeded 0.01") {
                    return StepOutcome::Fatal(time_step_below_min(control, msg));
                }
                bulk.restore();
                method::restore_wells(wells, &well_snapshot);
                continue;
            }

            for n in 0..bulk.num_cells() {
                bulk.record_saturation_change(n, &old_s[n]);
            }
            break;
        }

        for well in wells.iter_mut() {
            let cell = well.perforations.first().map(|p| p.bulk_index).unwrap_or(0);
            let model = bulk.model_at(cell);
            well.integrate_rates(bulk, model, bulk.num_component(), control.dt);
        }

        let changes = MaxChanges {
            d_p_max: method::max_pressure_change(bulk, &old_p),
            d_s_max: bulk.max_saturation_change(),
            d_n_max: 0.0,
            d_v_max: bulk.max_ve_residual(),
        };
        bulk.commit();
        let next_dt = control.predict_next_dt(changes.d_p_max, changes.d_s_max, changes.d_n_max.max(1.0e-6), changes.d_v_max);
        control.commit_step(stats, next_dt);
        StepOutcome::Committed
    }
}
