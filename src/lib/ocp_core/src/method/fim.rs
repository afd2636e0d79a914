//! Fully implicit (FIM) driver.
//!
//! ```text
//! prepare well, initial residual; maxRelRes0_v <- maxRelRes_v
//! while not converged and iterNR < maxNRiter:
//!   assemble J, rhs=-R; solve; receive dx
//!   update P, Ni with a per-cell chop
//!   CheckNi and CheckP; on failure halve dt, restore, restart Newton
//!   flash_deriv, kr/Pc deriv, rock, well flux, residual
//! convergence test:
//!   maxRelRes_v <= ctrlNR.NRtol*maxRelRes0_v OR
//!   maxRelRes_v <= NRtol OR maxRelRes_mol <= NRtol OR
//!   (NRdPmax <= NRdPmin AND NRdSmax <= NRdSmin)
//! if converged: run CheckP for well mode switches; if a switch occurred restart with halved dt
//! on commit: step dt' = dt * min(dPlim/dPmax, dSlim/dSmax, c_iter)
//! ```
//!
//! Residual per cell `n`, component `i`:
//! `R_i = Ni(t+dt) - Ni(t) - dt*sum_neighbours nij_flux - dt*sum_well qi`.
//! Volume-balance residual: `R_v = (vf(t+dt) - rockVp(t+dt))*scale`, purely
//! cell-local (no inter-cell coupling in that row, only `P_n`/`Ni,n`).
//!
//! The Jacobian built here couples component-balance rows to neighboring
//! cells through both the upstream potential's pressure terms and, where a
//! model's `flash_deriv` supplies a real `FlashOutput::d_sec_d_pri` block
//! (`connection.rs::phase_fluxes`'s `d_vol_dn_i`/`d_vol_dn_j`), the
//! upstream relative-permeability-on-composition term as well. The
//! composition-weighted flux's upstream `xi`/`xij` stay frozen within one
//! Newton iteration regardless, since re-deriving them every off-diagonal
//! entry would mean re-running the flash mid-assembly; the outer Newton
//! loop re-linearizes everything every iteration.

use nalgebra::DVector;

use crate::bulk::{Bulk, CheckNiOutcome};
use crate::connection::Connections;
use crate::control::Control;
use crate::linear_system::{BiCgStabSolver, LinearSolver, LinearSystemBuilder};
use crate::method::{self, time_step_below_min, MaxChanges, StepOutcome};
use crate::well::{CheckPOutcome, Well};

pub struct FimDriver {
    solver: Box<dyn LinearSolver>,
}

impl Default for FimDriver {
    fn default() -> Self {
        FimDriver { solver: Box::new(BiCgStabSolver::default()) }
    }
}

struct Residual {
    per_cell: Vec<Vec<f64>>,
    max_rel_res_v: f64,
    max_rel_res_mol: f64,
}

impl FimDriver {
    pub fn new(solver: Box<dyn LinearSolver>) -> Self {
        FimDriver { solver }
    }

    fn block_dim(nc: usize) -> usize {
        nc + 1
    }

    fn compute_residual(bulk: &Bulk, connections: &Connections, wells: &[Well], ni_old: &[Vec<f64>], dt: f64) -> Residual {
        let nc = bulk.num_component();
        let mut per_cell = vec![vec![0.0; nc + 1]; bulk.num_cells()];

        for n in 0..bulk.num_cells() {
            let flash = bulk.flash_out(n);
            per_cell[n][0] = flash.vf - bulk.rock_vp(n);
            for c in 0..nc {
                per_cell[n][1 + c] = bulk.ni_row(n)[c] - ni_old[n][c];
            }
        }

        for conn in connections.iter() {
            let flux = connections.component_fluxes(&conn, bulk);
            for c in 0..nc {
                per_cell[conn.bulk_i][1 + c] -= dt * flux[c];
                per_cell[conn.bulk_j][1 + c] += dt * flux[c];
            }
        }

        for well in wells {
            let cell = well.perforations.first().map(|p| p.bulk_index).unwrap_or(0);
            let model = bulk.model_at(cell);
            let rates = well.total_component_rates(bulk, model, nc);
            for perf in &well.perforations {
                if !perf.open {
                    continue;
                }
                let share = rates.iter().map(|r| r / well.perforations.iter().filter(|p| p.open).count() as f64);
                for (c, r) in share.enumerate() {
                    per_cell[perf.bulk_index][1 + c] -= dt * r;
                }
            }
        }

        let max_rel_res_v = (0..bulk.num_cells()).map(|n| (per_cell[n][0] / bulk.rock_vp(n)).abs()).fold(0.0, f64::max);
        let max_rel_res_mol = (0..bulk.num_cells())
            .map(|n| {
                let nt: f64 = bulk.ni_row(n).iter().sum::<f64>().max(1.0e-12);
                (1..=nc).map(|c| (per_cell[n][c] / nt).abs()).fold(0.0, f64::max)
            })
            .fold(0.0, f64::max);

        Residual { per_cell, max_rel_res_v, max_rel_res_mol }
    }

    fn assemble_jacobian(bulk: &Bulk, connections: &Connections, dt: f64) -> LinearSystemBuilder {
        let nc = bulk.num_component();
        let bs = Self::block_dim(nc);
        let dim = bulk.num_cells() * bs;
        let mut builder = LinearSystemBuilder::allocate(dim);

        for n in 0..bulk.num_cells() {
            let flash = bulk.flash_out(n);
            let base = n * bs;
            builder.add_entry(base, base, flash.vfp - bulk.rock_vp_derivative(n));
            for c in 0..nc {
                builder.add_entry(base, base + 1 + c, flash.vfi[c]);
                builder.add_entry(base + 1 + c, base + 1 + c, 1.0);
            }
        }

        for conn in connections.iter() {
            let fluxes = connections.phase_fluxes(&conn, bulk);
            let flash_i = bulk.flash_out(conn.bulk_i);
            let flash_j = bulk.flash_out(conn.bulk_j);
            let base_i = conn.bulk_i * bs;
            let base_j = conn.bulk_j * bs;

            for (ph, pf) in fluxes.iter().enumerate() {
                let upstream_flash = match pf.upstream {
                    crate::connection::Upstream::I => flash_i,
                    crate::connection::Upstream::J => flash_j,
                };
                if !upstream_flash.phase_exist[ph] {
                    continue;
                }
                let xi = upstream_flash.xi[ph];
                for c in 0..nc {
                    let weight = xi * upstream_flash.xij_at(ph, c);
                    if weight == 0.0 {
                        continue;
                    }
                    builder.add_entry(base_i + 1 + c, base_i, -dt * pf.d_vol_dp_i * weight);
                    builder.add_entry(base_i + 1 + c, base_j, -dt * pf.d_vol_dp_j * weight);
                    builder.add_entry(base_j + 1 + c, base_j, dt * pf.d_vol_dp_j * weight);
                    builder.add_entry(base_j + 1 + c, base_i, dt * pf.d_vol_dp_i * weight);

                    for cp in 0..nc {
                        let dvn_i = pf.d_vol_dn_i[cp];
                        if dvn_i != 0.0 {
                            builder.add_entry(base_i + 1 + c, base_i + 1 + cp, -dt * dvn_i * weight);
                            builder.add_entry(base_j + 1 + c, base_i + 1 + cp, dt * dvn_i * weight);
                        }
                        let dvn_j = pf.d_vol_dn_j[cp];
                        if dvn_j != 0.0 {
                            builder.add_entry(base_i + 1 + c, base_j + 1 + cp, -dt * dvn_j * weight);
                            builder.add_entry(base_j + 1 + c, base_j + 1 + cp, dt * dvn_j * weight);
                        }
                    }
                }
            }
        }

        builder
    }

    /// Applies `dx` to `(P, Ni)` with a per-cell scalar chop: the largest
    /// scalar in `(0, 1]` such that neither the pressure change exceeds
    /// `nr_dp_max` nor any component's relative molar change exceeds
    /// `nr_ds_max` (a molar proxy for the saturation-chop rule, since
    /// recomputing a trial flash for every candidate chop inside the
    /// Newton loop would be prohibitively expensive).
    fn apply_chopped_update(bulk: &mut Bulk, dx: &DVector<f64>, nr_dp_max: f64, nr_ds_max: f64) -> (f64, f64) {
        let nc = bulk.num_component();
        let bs = nc + 1;
        let mut global_dp_max: f64 = 0.0;
        let mut global_ds_max: f64 = 0.0;

        for n in 0..bulk.num_cells() {
            let base = n * bs;
            let dp = dx[base];
            let nt: f64 = bulk.ni_row(n).iter().sum::<f64>().max(1.0e-12);
            let mut worst_ratio: f64 = (dp.abs() / nr_dp_max).max(0.0);
            for c in 0..nc {
                let dn = dx[base + 1 + c];
                let ratio = (dn / nt).abs() / nr_ds_max.max(1.0e-9);
                if ratio > worst_ratio {
                    worst_ratio = ratio;
                }
            }
            let chop = if worst_ratio > 1.0 { 1.0 / worst_ratio } else { 1.0 };

            bulk.set_pressure(n, bulk.pressure(n) + chop * dp);
            let row = bulk.ni_row_mut(n);
            for c in 0..nc {
                row[c] += chop * dx[base + 1 + c];
            }

            global_dp_max = global_dp_max.max((chop * dp).abs());
            global_ds_max = global_ds_max.max(worst_ratio.min(1.0));
        }
        (global_dp_max, global_ds_max)
    }

    pub fn step(&self, bulk: &mut Bulk, connections: &Connections, wells: &mut Vec<Well>, control: &mut Control) -> StepOutcome {
        for well in wells.iter_mut() {
            let model = bulk.model_at(well.perforations.first().map(|p| p.bulk_index).unwrap_or(0));
            well.update_gravity_heads(bulk, model);
        }

        bulk.commit();
        let well_snapshot = method::snapshot_wells(wells);
        let old_p: Vec<f64> = (0..bulk.num_cells()).map(|n| bulk.pressure(n)).collect();
        let old_s: Vec<Vec<f64>> = (0..bulk.num_cells()).map(|n| bulk.flash_out(n).s.clone()).collect();
        let ni_old: Vec<Vec<f64>> = (0..bulk.num_cells()).map(|n| bulk.ni_row(n).to_vec()).collect();

        let nr = control.nr_params();
        let mut stats = crate::control::StepStats::default();

        let mut residual = Self::compute_residual(bulk, connections, wells, &ni_old, control.dt);
        let max_rel_res0_v = residual.max_rel_res_v;

        let mut iter_nr = 0;
        let mut d_p_max = 0.0;
        let mut d_s_max = 0.0;

        loop {
            let converged = residual.max_rel_res_v <= nr.nr_tol * max_rel_res0_v.max(1.0e-12)
                || residual.max_rel_res_v <= nr.nr_tol
                || residual.max_rel_res_mol <= nr.nr_tol
                || (d_p_max <= nr.nr_dp_min && d_s_max <= nr.nr_ds_min);

            if converged {
                break;
            }
            if iter_nr >= nr.max_nr_iter {
                if let Err(msg) = control.cut_dt_for_newton("Newton iteration limit reached without convergence") {
                    return StepOutcome::Fatal(time_step_below_min(control, msg));
                }
                bulk.restore();
                method::restore_wells(wells, &well_snapshot);
                return self.step(bulk, connections, wells, control);
            }

            let builder = Self::assemble_jacobian(bulk, connections, control.dt);
            let system = builder.build();
            let mut rhs = system.rhs.clone();
            for n in 0..bulk.num_cells() {
                let base = n * (bulk.num_component() + 1);
                for k in 0..=bulk.num_component() {
                    rhs[base + k] = -residual.per_cell[n][k];
                }
            }
            let system = crate::linear_system::LinearSystem { matrix: system.matrix, rhs };

            let solve_start = std::time::Instant::now();
            let x0 = DVector::zeros(system.dim());
            let (dx, report) = self.solver.solve(&system, &x0);
            crate::control::Control::record_linear_solve(&mut stats, report, solve_start.elapsed());

            let (dp, ds) = Self::apply_chopped_update(bulk, &dx, nr.nr_dp_max, nr.nr_ds_max);
            d_p_max = dp;
            d_s_max = ds;
            iter_nr += 1;

            if bulk.check_ni() == CheckNiOutcome::Retry || !bulk.check_p() {
                if let Err(msg) = control.cut_dt_for_newton("CheckNi/CheckP failed mid-Newton") {
                    return StepOutcome::Fatal(time_step_below_min(control, msg));
                }
                bulk.restore();
                method::restore_wells(wells, &well_snapshot);
                return self.step(bulk, connections, wells, control);
            }

            if let Err(e) = bulk.update_rock_pore_volume_all() {
                return StepOutcome::Fatal(e);
            }
            if let Err(e) = bulk.flash_all(true) {
                return StepOutcome::Fatal(e);
            }

            residual = Self::compute_residual(bulk, connections, wells, &ni_old, control.dt);
            stats.nr_iterations = iter_nr;
        }

        let mut mode_switched = false;
        for well in wells.iter_mut() {
            let cell = well.perforations.first().map(|p| p.bulk_index).unwrap_or(0);
            let model = bulk.model_at(cell);
            match well.check_p(bulk, model, bulk.num_component()) {
                CheckPOutcome::Ok => {}
                CheckPOutcome::ModeSwitched => mode_switched = true,
                CheckPOutcome::HalveDt => {
                    if let Err(msg) = control.halve_dt("well perforation pressure collapsed at convergence") {
                        return StepOutcome::Fatal(time_step_below_min(control, msg));
                    }
                    bulk.restore();
                    method::restore_wells(wells, &well_snapshot);
                    return self.step(bulk, connections, wells, control);
                }
            }
        }
        if mode_switched {
            if let Err(msg) = control.halve_dt("well mode switched at convergence") {
                return StepOutcome::Fatal(time_step_below_min(control, msg));
            }
            bulk.restore();
            method::restore_wells(wells, &well_snapshot);
            return self.step(bulk, connections, wells, control);
        }

        for n in 0..bulk.num_cells() {
            bulk.record_saturation_change(n, &old_s[n]);
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
        let _ = changes;
        bulk.commit();
        let next_dt = control.predict_next_dt_fim(method::max_pressure_change(bulk, &old_p), bulk.max_saturation_change(), iter_nr);
        control.commit_step(stats, next_dt);
        StepOutcome::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capillary::CapillaryPressure;
    use crate::control::{Control, CriticalTimeParams, NrParams, PredictParams, TimeParams};
    use crate::grid::{CellGeometry, Grid};
    use crate::mixture::black_oil::BlackOilModel;
    use crate::mixture::MixtureModel;
    use crate::pvt::PvtTable;
    use crate::relperm::FlowUnit;
    use crate::rock::RockProperties;
    use crate::well::{Perforation, WellRole};

    fn two_cell_setup() -> (Bulk, Connections, Vec<Well>, Control) {
        let cell = |depth: f64| CellGeometry {
            dx: 300.0,
            dy: 300.0,
            dz: 40.0,
            ntg: 1.0,
            porosity: 0.2,
            perm_x: 150.0,
            perm_y: 150.0,
            perm_z: 15.0,
            depth,
            satnum: 0,
            pvtnum: 0,
            rocknum: 0,
            active: true,
        };
        let grid = Grid::uniform(2, 1, 1, cell(8000.0));
        let model: Box<dyn MixtureModel> = Box::new(BlackOilModel::oil_water(
            PvtTable::new(vec![(1000.0, 1.3), (5000.0, 1.2)]),
            PvtTable::new(vec![(1000.0, 1.5), (5000.0, 0.8)]),
            1.0,
            3000.0,
            3.0e-6,
            0.5,
            350.0,
            350.3,
            53.0,
            62.4,
        ));
        let mut bulk = Bulk::setup(
            &grid,
            2,
            2,
            vec![model],
            vec![FlowUnit::default_scal()],
            vec![CapillaryPressure::default_pc()],
            vec![RockProperties::default_rock()],
        )
        .unwrap();
        bulk.set_pressure(0, 4000.0);
        bulk.set_pressure(1, 3900.0);
        bulk.update_rock_pore_volume_all().unwrap();
        bulk.ni_row_mut(0).copy_from_slice(&[600.0, 900.0]);
        bulk.ni_row_mut(1).copy_from_slice(&[600.0, 900.0]);
        bulk.flash_all(true).unwrap();

        let connections = Connections::build(&grid);

        let mut producer = Well::new("P1", "G1", 1, 0, 8000.0, WellRole::Producer, 3000.0, 500.0, 6000.0);
        producer.add_perforation(Perforation::new(1, 8000.0, 0.3));
        let wells = vec![producer];

        let schedule = vec![CriticalTimeParams {
            critical_time_index: 0,
            time: TimeParams::default(),
            predict: PredictParams::default(),
            nr: NrParams { max_nr_iter: 15, ..NrParams::default() },
        }];
        let control = Control::new(schedule);
        (bulk, connections, wells, control)
    }

    #[test]
    fn fim_step_commits_and_advances_time() {
        let (mut bulk, connections, mut wells, mut control) = two_cell_setup();
        let driver = FimDriver::default();
        let outcome = driver.step(&mut bulk, &connections, &mut wells, &mut control);
        assert!(matches!(outcome, StepOutcome::Committed));
        assert_eq!(control.total_steps, 1);
    }
}
