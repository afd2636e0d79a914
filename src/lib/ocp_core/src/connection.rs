//! `Connection`: inter-cell flux evaluation.
//!
//! Built once from `Grid` geometry (mirrors `Bulk::setup`'s "never grows
//! after setup" lifecycle) and re-evaluated every Newton iteration against
//! the current `Bulk` state. Each connection carries the Darcy geometric
//! factor (permeability/area/distance, independent of fluid state) and,
//! per phase, computes an upstream-weighted volumetric flux from the two
//! cells' pressure, capillary pressure, and phase density.

use crate::bulk::{Bulk, KrPcResult};
use crate::grid::Grid;
use crate::mixture::FlashOutput;
use crate::units::TRANSMISSIBILITY_CONST;

/// Static (state-independent) half of one inter-cell connection: which two
/// active cells it links and the Darcy geometric factor between them.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionGeom {
    pub bulk_i: usize,
    pub bulk_j: usize,
    /// Harmonic-mean-permeability * area / distance, already multiplied by
    /// the field-unit Darcy constant; multiplying by a phase's relative
    /// mobility gives a transmissibility in rb/day/psi.
    pub trans_geom: f64,
}

/// Direction convention: positive flux means phase moves from `bulk_i`
/// toward `bulk_j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    I,
    J,
}

/// Per-phase evaluation of one connection at the current `Bulk` state.
#[derive(Debug, Clone)]
pub struct PhaseFlux {
    /// Reservoir-volume flow rate [rb/day], `bulk_i -> bulk_j` positive.
    pub volumetric: f64,
    pub upstream: Upstream,
    /// `d(volumetric)/dP_i`, `d(volumetric)/dP_j` — used by the fully
    /// implicit Jacobian; IMPES only reads `volumetric`.
    pub d_vol_dp_i: f64,
    pub d_vol_dp_j: f64,
    /// `d(volumetric)/dN_{i,c}`, `d(volumetric)/dN_{j,c}` through the
    /// upstream cell's relative-permeability-on-saturation chain rule
    /// (`dkr/dS` times the upstream flash's `d_sec_d_pri` saturation
    /// row); zero on the non-upstream side and zero everywhere a model's
    /// `flash_deriv` leaves `d_sec_d_pri` empty.
    pub d_vol_dn_i: Vec<f64>,
    pub d_vol_dn_j: Vec<f64>,
}

pub struct Connections {
    geoms: Vec<ConnectionGeom>,
}

impl Connections {
    /// Walks every structured neighbour pair once (`i < j` in bulk-index
    /// order so each connection is stored a single time) and keeps the ones
    /// where both cells are active and the harmonic-mean permeability is
    /// positive.
    pub fn build(grid: &Grid) -> Connections {
        let mut geoms = Vec::new();
        for k in 0..grid.nz {
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let gi = grid.grid_index(i, j, k);
                    let bi = match grid.active_bulk_index(gi) {
                        Some(b) => b,
                        None => continue,
                    };
                    for (gn, dim) in grid.neighbors(i, j, k) {
                        let bn = match grid.active_bulk_index(gn) {
                            Some(b) => b,
                            None => continue,
                        };
                        if bn <= bi {
                            continue;
                        }
                        let ci = grid.geometry(gi);
                        let cn = grid.geometry(gn);
                        let (perm_i, perm_n, dist, area) = match dim {
                            'x' => (ci.perm_x, cn.perm_x, ci.dx, ci.dy * ci.dz),
                            'y' => (ci.perm_y, cn.perm_y, ci.dy, ci.dx * ci.dz),
                            _ => (ci.perm_z, cn.perm_z, ci.dz, ci.dx * ci.dy),
                        };
                        if perm_i <= 0.0 || perm_n <= 0.0 {
                            continue;
                        }
                        let k_h = 2.0 * perm_i * perm_n / (perm_i + perm_n);
                        let trans_geom = TRANSMISSIBILITY_CONST * k_h * area / dist;
                        geoms.push(ConnectionGeom {
                            bulk_i: bi,
                            bulk_j: bn,
                            trans_geom,
                        });
                    }
                }
            }
        }
        Connections { geoms }
    }

    pub fn len(&self) -> usize {
        self.geoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geoms.is_empty()
    }

    pub fn geom(&self, idx: usize) -> ConnectionGeom {
        self.geoms[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionGeom> {
        self.geoms.iter()
    }

    /// Upstream-weighted phase fluxes for one connection at `bulk`'s
    /// current state. Gravity is folded in via the average of the two
    /// cells' phase density (absent-phase density reads as zero, which
    /// only matters when the phase is absent on both sides — then the
    /// mobility term below is already zero).
    pub fn phase_fluxes(&self, conn: &ConnectionGeom, bulk: &Bulk) -> Vec<PhaseFlux> {
        let np = bulk.num_phase();
        let nc = bulk.num_component();
        let kr_i = bulk.kr_pc(conn.bulk_i);
        let kr_j = bulk.kr_pc(conn.bulk_j);
        let flash_i = bulk.flash_out(conn.bulk_i);
        let flash_j = bulk.flash_out(conn.bulk_j);
        let depth_diff = bulk.depth_at(conn.bulk_i) - bulk.depth_at(conn.bulk_j);
        let p_i = bulk.pressure(conn.bulk_i);
        let p_j = bulk.pressure(conn.bulk_j);

        // Fixed phase-index convention `kr_pc` already relies on: the last
        // phase is always water, and in the three-phase case phase 1 is gas.
        let water_idx = if np >= 2 { Some(np - 1) } else { None };
        let gas_idx = if np == 3 { Some(1) } else { None };
        let d_sat_dn = |flash: &FlashOutput, phase: usize, c: usize| -> f64 {
            if phase >= flash.d_sec_d_pri_rows {
                return 0.0;
            }
            flash.d_sec_d_pri[phase * (nc + 1) + 1 + c]
        };
        let dkr_dn = |flash: &FlashOutput, kr: &KrPcResult, ph: usize| -> Vec<f64> {
            (0..nc)
                .map(|c| {
                    let dsw = water_idx.map(|wi| d_sat_dn(flash, wi, c)).unwrap_or(0.0);
                    let dsg = gas_idx.map(|gi| d_sat_dn(flash, gi, c)).unwrap_or(0.0);
                    kr.dkr_dsw[ph] * dsw + kr.dkr_dsg[ph] * dsg
                })
                .collect()
        };

        let mut out = Vec::with_capacity(np);
        for ph in 0..np {
            let rho_i = if flash_i.phase_exist[ph] { flash_i.rho[ph] } else { 0.0 };
            let rho_j = if flash_j.phase_exist[ph] { flash_j.rho[ph] } else { 0.0 };
            let rho_avg = 0.5 * (rho_i + rho_j);
            let gamma_head = rho_avg * crate::units::GRAVITY_FACTOR * depth_diff;

            let pot_diff = (p_i + kr_i.pc[ph]) - (p_j + kr_j.pc[ph]) - gamma_head;

            let (upstream, kr_up, mu_up) = if pot_diff >= 0.0 {
                (Upstream::I, kr_i.kr[ph], flash_i.mu.get(ph).copied().unwrap_or(1.0))
            } else {
                (Upstream::J, kr_j.kr[ph], flash_j.mu.get(ph).copied().unwrap_or(1.0))
            };

            let mobility = if mu_up > 0.0 { kr_up / mu_up } else { 0.0 };
            let trans = conn.trans_geom * mobility;
            let volumetric = trans * pot_diff;

            let (d_vol_dn_i, d_vol_dn_j) = if mu_up > 0.0 {
                let scale = conn.trans_geom * pot_diff / mu_up;
                match upstream {
                    Upstream::I => (dkr_dn(flash_i, &kr_i, ph).iter().map(|d| d * scale).collect(), vec![0.0; nc]),
                    Upstream::J => (vec![0.0; nc], dkr_dn(flash_j, &kr_j, ph).iter().map(|d| d * scale).collect()),
                }
            } else {
                (vec![0.0; nc], vec![0.0; nc])
            };

            out.push(PhaseFlux {
                volumetric,
                upstream,
                d_vol_dp_i: trans,
                d_vol_dp_j: -trans,
                d_vol_dn_i,
                d_vol_dn_j,
            });
        }
        out
    }

    /// Component molar flux [lbmol/day] at a connection, `bulk_i -> bulk_j`
    /// positive: `Σj volumetric[j] * xi_upstream[j] * xij_upstream[j, c]`.
    pub fn component_fluxes(&self, conn: &ConnectionGeom, bulk: &Bulk) -> Vec<f64> {
        let nc = bulk.num_component();
        let fluxes = self.phase_fluxes(conn, bulk);
        let flash_i = bulk.flash_out(conn.bulk_i);
        let flash_j = bulk.flash_out(conn.bulk_j);

        let mut out = vec![0.0; nc];
        for (ph, pf) in fluxes.iter().enumerate() {
            if pf.volumetric == 0.0 {
                continue;
            }
            let upstream_flash = match pf.upstream {
                Upstream::I => flash_i,
                Upstream::J => flash_j,
            };
            if !upstream_flash.phase_exist[ph] {
                continue;
            }
            let xi = upstream_flash.xi[ph];
            for c in 0..nc {
                out[c] += pf.volumetric * xi * upstream_flash.xij_at(ph, c);
            }
        }
        out
    }

    /// Largest fraction of a cell's pore volume that one connection could
    /// move in `dt` days, over every connection and phase — the CFL-style
    /// stability bound `Control` halves `dt` against.
    pub fn max_cfl_fraction(&self, bulk: &Bulk, dt_days: f64) -> f64 {
        let mut worst: f64 = 0.0;
        for conn in &self.geoms {
            for pf in self.phase_fluxes(conn, bulk) {
                let donor = match pf.upstream {
                    Upstream::I => conn.bulk_i,
                    Upstream::J => conn.bulk_j,
                };
                let vp = bulk.rock_vp(donor);
                if vp <= 0.0 {
                    continue;
                }
                let frac = (pf.volumetric * dt_days / vp).abs();
                if frac > worst {
                    worst = frac;
                }
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capillary::CapillaryPressure;
    use crate::grid::CellGeometry;
    use crate::mixture::black_oil::BlackOilModel;
    use crate::mixture::MixtureModel;
    use crate::pvt::PvtTable;
    use crate::relperm::FlowUnit;
    use crate::rock::RockProperties;

    fn cell(depth: f64) -> CellGeometry {
        CellGeometry {
            dx: 100.0,
            dy: 100.0,
            dz: 20.0,
            ntg: 1.0,
            porosity: 0.2,
            perm_x: 100.0,
            perm_y: 100.0,
            perm_z: 10.0,
            depth,
            satnum: 0,
            pvtnum: 0,
            rocknum: 0,
            active: true,
        }
    }

    fn two_cell_bulk() -> (Grid, Bulk) {
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
        bulk.set_pressure(0, 3100.0);
        bulk.set_pressure(1, 2900.0);
        bulk.update_rock_pore_volume_all().unwrap();
        bulk.ni_row_mut(0).copy_from_slice(&[500.0, 800.0]);
        bulk.ni_row_mut(1).copy_from_slice(&[500.0, 800.0]);
        bulk.flash_all(false).unwrap();
        (grid, bulk)
    }

    #[test]
    fn build_finds_one_connection_for_a_two_cell_line() {
        let (grid, _bulk) = two_cell_bulk();
        let conns = Connections::build(&grid);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns.geom(0).bulk_i, 0);
        assert_eq!(conns.geom(0).bulk_j, 1);
    }

    #[test]
    fn flow_goes_from_high_pressure_to_low_pressure() {
        let (grid, bulk) = two_cell_bulk();
        let conns = Connections::build(&grid);
        let conn = conns.geom(0);
        let fluxes = conns.phase_fluxes(&conn, &bulk);
        for pf in fluxes {
            if pf.volumetric != 0.0 {
                assert!(pf.volumetric > 0.0, "flow should move from cell 0 (higher P) to cell 1");
                assert_eq!(pf.upstream, Upstream::I);
            }
        }
    }

    #[test]
    fn cfl_fraction_is_finite_and_nonnegative() {
        let (grid, bulk) = two_cell_bulk();
        let conns = Connections::build(&grid);
        let frac = conns.max_cfl_fraction(&bulk, 1.0);
        assert!(frac.is_finite());
        assert!(frac >= 0.0);
    }
}
