//! `Bulk`: the cell-wise state container.
//!
//! Owns every per-cell vector (`P`, `T`, `Ni`, the `FlashOutput` scratch, the
//! rock pore volume, and the skip-stability-analysis trust region), the
//! per-PVTNUM `MixtureModel` table, and the per-SATNUM/ROCKNUM flow/rock
//! function objects. `Bulk` never grows after [`Bulk::setup`].

use crate::capillary::CapillaryPressure;
use crate::error::{OcpError, OcpResult};
use crate::grid::Grid;
use crate::mixture::accelerator::{FlashType, FlashTypeTracker};
use crate::mixture::{FlashOutput, MixtureModel};
use crate::relperm::FlowUnit;
use crate::rock::RockProperties;
use crate::units::{NEGATIVE_NI_RESET_FRACTION, NEGATIVE_NI_SOFT_RESET_FRACTION, TINY};

/// Outcome of [`Bulk::check_ni`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckNiOutcome {
    Ok,
    /// One or more cells had a small negative `Ni` soft-reset to
    /// `1e-8 * Nt`; the step may proceed.
    SoftReset { cells_reset: usize },
    /// A cell's negative `Ni` exceeded the soft-reset magnitude threshold;
    /// the caller must halve `dt` and retry.
    Retry,
}

/// A region's equilibrium-initialization input. `woc_depth`/`goc_depth`
/// being absent selects which of the three reference regimes applies: both
/// present is the general three-phase case; one absent collapses to a
/// two-phase system; both absent means a single-phase region, still
/// handled by [`Bulk::init_sj_pc`] with both contacts unset.
#[derive(Debug, Clone, Copy)]
pub struct EquilRegion {
    pub datum_depth: f64,
    pub datum_pressure: f64,
    pub woc_depth: Option<f64>,
    pub goc_depth: Option<f64>,
}

/// Euler-integrates `dP/dz = gamma(P)` from `(anchor_depth, anchor_pressure)`
/// outward across every depth in `depths`, with `mynum` substeps per unit
/// segment. `gamma` depends only on pressure here
/// (temperature is carried as a passthrough, not used here); returns one
/// pressure value per entry of `depths`.
fn integrate_depth_pressure(depths: &[f64], anchor_depth: f64, anchor_pressure: f64, gamma: impl Fn(f64) -> f64) -> Vec<f64> {
    const MYNUM: usize = 10;
    let mut out = vec![0.0; depths.len()];
    let anchor_idx = depths
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - anchor_depth).abs().partial_cmp(&(b.1 - anchor_depth).abs()).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    let march = |from_depth: f64, from_pressure: f64, to_depth: f64| -> f64 {
        let mut z = from_depth;
        let mut p = from_pressure;
        let step = (to_depth - from_depth) / MYNUM as f64;
        for _ in 0..MYNUM {
            let k1 = gamma(p);
            let p_mid = p + 0.5 * step * k1;
            let k2 = gamma(p_mid);
            p += step * k2;
            z += step;
        }
        let _ = z;
        p
    };

    out[anchor_idx] = anchor_pressure;
    let mut prev_depth = anchor_depth;
    let mut prev_pressure = anchor_pressure;
    for idx in (0..anchor_idx).rev() {
        let p = march(prev_depth, prev_pressure, depths[idx]);
        out[idx] = p;
        prev_depth = depths[idx];
        prev_pressure = p;
    }
    prev_depth = anchor_depth;
    prev_pressure = anchor_pressure;
    for idx in (anchor_idx + 1)..depths.len() {
        let p = march(prev_depth, prev_pressure, depths[idx]);
        out[idx] = p;
        prev_depth = depths[idx];
        prev_pressure = p;
    }
    out
}

/// Linear interpolation into a (depths, pressures) table sorted ascending
/// by depth, flat beyond the ends.
fn interp_depth_table(depths: &[f64], pressures: &[f64], z: f64) -> f64 {
    if z <= depths[0] {
        return pressures[0];
    }
    if z >= depths[depths.len() - 1] {
        return pressures[depths.len() - 1];
    }
    for w in depths.windows(2).zip(pressures.windows(2)) {
        let ((d0, d1), (p0, p1)) = ((w.0[0], w.0[1]), (w.1[0], w.1[1]));
        if z >= d0 && z <= d1 {
            let t = (z - d0) / (d1 - d0);
            return p0 + t * (p1 - p0);
        }
    }
    pressures[pressures.len() - 1]
}

/// Inverts a monotone saturation function `f(s)` over `[lo, hi]` by
/// bisection for `f(s) = target`.
fn invert_monotone(lo: f64, hi: f64, target: f64, f: impl Fn(f64) -> f64) -> f64 {
    let (mut a, mut b) = (lo, hi);
    let (fa, fb) = (f(a) - target, f(b) - target);
    if fa.abs() < 1.0e-9 {
        return a;
    }
    if fb.abs() < 1.0e-9 {
        return b;
    }
    if fa.signum() == fb.signum() {
        return if fa.abs() < fb.abs() { a } else { b };
    }
    for _ in 0..60 {
        let mid = 0.5 * (a + b);
        let fm = f(mid) - target;
        if fm.abs() < 1.0e-10 {
            return mid;
        }
        if fm.signum() == fa.signum() {
            a = mid;
        } else {
            b = mid;
        }
    }
    0.5 * (a + b)
}

/// One per-cell static region assignment plus the owning Bulk's shared
/// per-region tables, bundled so call sites don't thread four separate
/// `Vec`s through every per-cell routine.
struct RegionTables {
    models: Vec<Box<dyn MixtureModel>>,
    scal: Vec<FlowUnit>,
    pc: Vec<CapillaryPressure>,
    rock: Vec<RockProperties>,
}

/// Per-cell relative permeability and capillary pressure at the cell's
/// current saturations, with derivatives, per phase.
#[derive(Debug, Clone)]
pub struct KrPcResult {
    /// `kr[j]`, `dkr_dsw[j]`, `dkr_dsg[j]` per existing phase (absent
    /// phases carry zero).
    pub kr: Vec<f64>,
    pub dkr_dsw: Vec<f64>,
    pub dkr_dsg: Vec<f64>,
    /// Capillary pressure relative to the oil phase (`Pcow`/`Pcgo`, 0 for
    /// the oil phase itself), with saturation derivatives.
    pub pc: Vec<f64>,
    pub dpc_dsw: Vec<f64>,
    pub dpc_dsg: Vec<f64>,
}

pub struct Bulk {
    num_cells: usize,
    num_phase: usize,
    num_component: usize,

    satnum: Vec<usize>,
    pvtnum: Vec<usize>,
    rocknum: Vec<usize>,
    static_pore_volume: Vec<f64>,
    depth: Vec<f64>,

    regions: RegionTables,

    p: Vec<f64>,
    t: Vec<f64>,
    ni: Vec<f64>,
    flash: Vec<FlashOutput>,
    rock_vp: Vec<f64>,
    accelerator: Vec<FlashTypeTracker>,
    d_s_nr: Vec<f64>,

    last_p: Vec<f64>,
    last_t: Vec<f64>,
    last_ni: Vec<f64>,
    last_flash: Vec<FlashOutput>,
    last_rock_vp: Vec<f64>,
    last_accelerator: Vec<FlashTypeTracker>,
}

impl Bulk {
    /// `Setup(grid)`: copies per-cell geometry/region indices
    /// from the active-cell map and sizes every per-cell vector. `models`,
    /// `scal`, `pc`, and `rock` are indexed by PVTNUM/SATNUM/SATNUM/ROCKNUM
    /// respectively.
    pub fn setup(
        grid: &Grid,
        num_phase: usize,
        num_component: usize,
        models: Vec<Box<dyn MixtureModel>>,
        scal: Vec<FlowUnit>,
        pc: Vec<CapillaryPressure>,
        rock: Vec<RockProperties>,
    ) -> OcpResult<Bulk> {
        let geoms = grid.active_geometries();
        let num_cells = geoms.len();

        let mut satnum = Vec::with_capacity(num_cells);
        let mut pvtnum = Vec::with_capacity(num_cells);
        let mut rocknum = Vec::with_capacity(num_cells);
        let mut static_pore_volume = Vec::with_capacity(num_cells);
        let mut depth = Vec::with_capacity(num_cells);

        for g in &geoms {
            satnum.push(g.satnum);
            pvtnum.push(g.pvtnum);
            rocknum.push(g.rocknum);
            static_pore_volume.push(g.static_pore_volume());
            depth.push(g.depth);
        }

        let flash = vec![FlashOutput::sized(num_phase, num_component); num_cells];
        let accelerator = vec![FlashTypeTracker::new(num_component); num_cells];

        Ok(Bulk {
            num_cells,
            num_phase,
            num_component,
            satnum,
            pvtnum,
            rocknum,
            static_pore_volume,
            depth,
            regions: RegionTables { models, scal, pc, rock },
            p: vec![0.0; num_cells],
            t: vec![60.0; num_cells],
            ni: vec![0.0; num_cells * num_component],
            flash: flash.clone(),
            rock_vp: vec![0.0; num_cells],
            accelerator: accelerator.clone(),
            d_s_nr: vec![0.0; num_cells * num_phase],
            last_p: vec![0.0; num_cells],
            last_t: vec![60.0; num_cells],
            last_ni: vec![0.0; num_cells * num_component],
            last_flash: flash,
            last_rock_vp: vec![0.0; num_cells],
            last_accelerator: accelerator,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }
    pub fn num_phase(&self) -> usize {
        self.num_phase
    }
    pub fn num_component(&self) -> usize {
        self.num_component
    }
    pub fn pressure(&self, n: usize) -> f64 {
        self.p[n]
    }
    pub fn set_pressure(&mut self, n: usize, value: f64) {
        self.p[n] = value;
    }
    pub fn ni_row(&self, n: usize) -> &[f64] {
        &self.ni[n * self.num_component..(n + 1) * self.num_component]
    }
    pub fn ni_row_mut(&mut self, n: usize) -> &mut [f64] {
        let nc = self.num_component;
        &mut self.ni[n * nc..(n + 1) * nc]
    }
    pub fn flash_out(&self, n: usize) -> &FlashOutput {
        &self.flash[n]
    }
    pub fn rock_vp(&self, n: usize) -> f64 {
        self.rock_vp[n]
    }
    pub fn depth_at(&self, n: usize) -> f64 {
        self.depth[n]
    }

    fn model(&self, n: usize) -> &dyn MixtureModel {
        self.regions.models[self.pvtnum[n]].as_ref()
    }

    /// The fluid-behaviour model governing cell `n`'s PVTNUM region, for
    /// callers outside `Bulk` (well source terms, connection fluxes) that
    /// need direct access to `xi_phase`/`rho_phase` rather than a flash
    /// result.
    pub fn model_at(&self, n: usize) -> &dyn MixtureModel {
        self.model(n)
    }

    /// Updates `rock_vp[n]` from the ROCKNUM model at the cell's current
    /// pressure.
    pub fn update_rock_pore_volume(&mut self, n: usize) -> OcpResult<()> {
        let rock = &self.regions.rock[self.rocknum[n]];
        let vp = self.static_pore_volume[n] * rock.multiplier(self.p[n]);
        if vp <= 0.0 {
            return Err(OcpError::NonPositivePoreVolume { bulk: n, vp_rb: vp });
        }
        self.rock_vp[n] = vp;
        Ok(())
    }

    /// `d(rockVp)/dP` at cell `n`'s current pressure, needed by the fully
    /// implicit driver's volume-balance Jacobian row.
    pub fn rock_vp_derivative(&self, n: usize) -> f64 {
        let rock = &self.regions.rock[self.rocknum[n]];
        self.static_pore_volume[n] * rock.dmultiplier_dp()
    }

    pub fn update_rock_pore_volume_all(&mut self) -> OcpResult<()> {
        for n in 0..self.num_cells {
            self.update_rock_pore_volume(n)?;
        }
        Ok(())
    }

    /// `InitSjPc`: builds the depth-pressure tables for oil,
    /// gas, and water by integrating `dP/dz = gamma_phase(P)` outward from
    /// `equil.datum_depth`, covering the three reference regimes by
    /// anchoring each phase's table at its own contact (or the datum, if
    /// that phase's contact is absent) and extrapolating across the whole
    /// domain. Per cell, `Pcow`/`Pcgo` at the cell's depth are inverted
    /// against the region's `FlowUnit` curves to get initial saturations.
    pub fn init_sj_pc(&mut self, region_cells: &[usize], equil: &EquilRegion) -> OcpResult<()> {
        let mut depths: Vec<f64> = region_cells.iter().map(|&n| self.depth[n]).collect();
        depths.push(equil.datum_depth);
        if let Some(d) = equil.woc_depth {
            depths.push(d);
        }
        if let Some(d) = equil.goc_depth {
            depths.push(d);
        }
        depths.sort_by(|a, b| a.partial_cmp(b).unwrap());
        depths.dedup_by(|a, b| (*a - *b).abs() < 1.0e-9);

        let pvtnum0 = region_cells.first().map(|&n| self.pvtnum[n]).unwrap_or(0);
        let model = self.regions.models[pvtnum0].as_ref();

        let (oil_anchor_depth, oil_anchor_pressure) = match (equil.goc_depth, equil.woc_depth) {
            (Some(goc), _) if equil.datum_depth < goc => {
                let gas_table = integrate_depth_pressure(&depths, equil.datum_depth, equil.datum_pressure, |p| model.gamma_phase_g(p));
                let p_at_goc = interp_depth_table(&depths, &gas_table, goc);
                (goc, p_at_goc)
            }
            (_, Some(woc)) if equil.datum_depth > woc => {
                let water_table = integrate_depth_pressure(&depths, equil.datum_depth, equil.datum_pressure, |p| model.gamma_phase_w(p));
                let p_at_woc = interp_depth_table(&depths, &water_table, woc);
                (woc, p_at_woc)
            }
            _ => (equil.datum_depth, equil.datum_pressure),
        };

        let oil_table = integrate_depth_pressure(&depths, oil_anchor_depth, oil_anchor_pressure, |p| model.gamma_phase_o(p));

        let gas_table = if let Some(goc) = equil.goc_depth {
            let p_at_goc = interp_depth_table(&depths, &oil_table, goc);
            integrate_depth_pressure(&depths, goc, p_at_goc, |p| model.gamma_phase_g(p))
        } else {
            oil_table.clone()
        };

        let water_table = if let Some(woc) = equil.woc_depth {
            let p_at_woc = interp_depth_table(&depths, &oil_table, woc);
            integrate_depth_pressure(&depths, woc, p_at_woc, |p| model.gamma_phase_w(p))
        } else {
            oil_table.clone()
        };

        for &n in region_cells {
            let z = self.depth[n];
            let po = interp_depth_table(&depths, &oil_table, z);
            let pg = interp_depth_table(&depths, &gas_table, z);
            let pw = interp_depth_table(&depths, &water_table, z);

            let scal = &self.regions.scal[self.satnum[n]];
            let pc = &self.regions.pc[self.satnum[n]];

            let sw = if equil.woc_depth.is_some() {
                let target = po - pw;
                invert_monotone(scal.swco, 1.0 - scal.sorw, target, |s| pc.pcow(s, scal).pc)
            } else {
                scal.swco
            };
            let sg = if equil.goc_depth.is_some() {
                let target = pg - po;
                invert_monotone(scal.sgc, (1.0 - scal.swco - scal.sorg - scal.sgc).max(scal.sgc), target, |s| pc.pcgo(s, scal).pc)
            } else {
                0.0
            };
            let so = (1.0 - sw - sg).max(0.0);

            let s = match self.num_phase {
                1 => vec![1.0],
                2 => vec![so, sw],
                _ => vec![so, sg, sw],
            };

            self.p[n] = po;
            self.update_rock_pore_volume(n)?;
            let zi = vec![1.0 / self.num_component as f64; self.num_component];
            let pore_volume = self.rock_vp[n];
            let model = self.regions.models[self.pvtnum[n]].as_ref();
            model.init_flash_by_saturation(self.p[n], self.t[n], &s, pore_volume, &zi, &mut self.flash[n])?;
            self.ni_row_mut(n).copy_from_slice(&self.flash[n].nj);
        }

        Ok(())
    }

    /// Component mole fractions for cell `n`, the same quantity the
    /// accelerator's trust region is keyed on (`composition_ref`), so every
    /// `classify`/`update` pair compares like with like.
    fn zi_row(&self, n: usize) -> Vec<f64> {
        let nc = self.num_component;
        let ni_row = &self.ni[n * nc..(n + 1) * nc];
        let nt: f64 = ni_row.iter().sum();
        if nt > TINY {
            ni_row.iter().map(|x| x / nt).collect()
        } else {
            vec![0.0; nc]
        }
    }

    /// `Flash`: runs every cell's flash through the accelerator
    /// (`CalFlashType`), always computing derivatives since FIM and IMPES
    /// share the same flash path.
    pub fn flash_all(&mut self, in_fim: bool) -> OcpResult<()> {
        for n in 0..self.num_cells {
            let zi = self.zi_row(n);
            let flash_type = self.accelerator[n].classify(self.p[n], self.t[n], &zi, in_fim, 0.0, 0.0);
            if flash_type == FlashType::SkipAll {
                continue;
            }
            let model = self.regions.models[self.pvtnum[n]].as_ref();
            let nc = self.num_component;
            let ni_row: Vec<f64> = self.ni[n * nc..(n + 1) * nc].to_vec();
            model.flash_deriv(self.p[n], self.t[n], &ni_row, &mut self.flash[n])?;
            let min_eigen = self.flash[n].stability_margin;
            self.accelerator[n].update(self.p[n], self.t[n], &zi, min_eigen, self.flash[n].phase_exist.iter().filter(|x| **x).count());
        }
        Ok(())
    }

    /// `CheckP`: OCP_TRUE iff every cell pressure is positive.
    pub fn check_p(&self) -> bool {
        self.p.iter().all(|&p| p > 0.0)
    }

    /// `CheckNi`: soft-resets small negative moles, flags a
    /// retry for anything larger.
    pub fn check_ni(&mut self) -> CheckNiOutcome {
        let nc = self.num_component;
        let mut cells_reset = 0;
        let mut needs_retry = false;
        for n in 0..self.num_cells {
            let row = &mut self.ni[n * nc..(n + 1) * nc];
            let nt: f64 = row.iter().map(|x| x.abs()).sum();
            for v in row.iter_mut() {
                if *v < 0.0 {
                    if v.abs() < NEGATIVE_NI_SOFT_RESET_FRACTION * nt {
                        *v = NEGATIVE_NI_RESET_FRACTION * nt;
                        cells_reset += 1;
                    } else {
                        needs_retry = true;
                    }
                }
            }
        }
        if needs_retry {
            CheckNiOutcome::Retry
        } else if cells_reset > 0 {
            CheckNiOutcome::SoftReset { cells_reset }
        } else {
            CheckNiOutcome::Ok
        }
    }

    /// `CheckVe(Vlim)`: OCP_TRUE iff every cell's volume-balance
    /// residual `|vf - rockVp| / rockVp < Vlim`.
    pub fn check_ve(&self, vlim: f64) -> bool {
        (0..self.num_cells).all(|n| {
            let vp = self.rock_vp[n];
            ((self.flash[n].vf - vp) / vp).abs() < vlim
        })
    }

    /// Maximum volume-balance residual magnitude, for `Control`'s
    /// `maxRelRes_v` bookkeeping.
    pub fn max_ve_residual(&self) -> f64 {
        (0..self.num_cells)
            .map(|n| ((self.flash[n].vf - self.rock_vp[n]) / self.rock_vp[n]).abs())
            .fold(0.0, f64::max)
    }

    /// `CalFlashType`, exposed for callers (the method drivers)
    /// that want to know the type without forcing a flash.
    pub fn cal_flash_type(&self, n: usize, in_fim: bool, ds_nr: f64, ds_nrp: f64) -> FlashType {
        self.accelerator[n].classify(self.p[n], self.t[n], &self.zi_row(n), in_fim, ds_nr, ds_nrp)
    }

    /// Relative permeability and capillary pressure at the cell's current
    /// saturations.
    pub fn kr_pc(&self, n: usize) -> KrPcResult {
        let scal = &self.regions.scal[self.satnum[n]];
        let pc = &self.regions.pc[self.satnum[n]];
        let s = &self.flash[n].s;

        match self.num_phase {
            1 => KrPcResult {
                kr: vec![1.0],
                dkr_dsw: vec![0.0],
                dkr_dsg: vec![0.0],
                pc: vec![0.0],
                dpc_dsw: vec![0.0],
                dpc_dsg: vec![0.0],
            },
            2 => {
                let sw = s[1];
                let krw = scal.krw(sw);
                let krow = scal.krow(sw);
                let pcow = pc.pcow(sw, scal);
                KrPcResult {
                    kr: vec![krow.kr, krw.kr],
                    dkr_dsw: vec![-krow.dkr_ds, krw.dkr_ds],
                    dkr_dsg: vec![0.0, 0.0],
                    pc: vec![0.0, -pcow.pc],
                    dpc_dsw: vec![0.0, -pcow.dpc_ds],
                    dpc_dsg: vec![0.0, 0.0],
                }
            }
            _ => {
                let so = s[0];
                let sg = s[1];
                let sw = s[2];
                let (kro, kro_dsw, kro_dsg) = scal.kro_stone1(sw, sg);
                let krg = scal.krg(sg);
                let krw = scal.krw(sw);
                let pcow = pc.pcow(sw, scal);
                let pcgo = pc.pcgo(sg, scal);
                let _ = so;
                KrPcResult {
                    kr: vec![kro, krg.kr, krw.kr],
                    dkr_dsw: vec![kro_dsw, 0.0, krw.dkr_ds],
                    dkr_dsg: vec![kro_dsg, krg.dkr_ds, 0.0],
                    pc: vec![0.0, pcgo.pc, -pcow.pc],
                    dpc_dsw: vec![0.0, 0.0, -pcow.dpc_ds],
                    dpc_dsg: vec![0.0, pcgo.dpc_ds, 0.0],
                }
            }
        }
    }

    /// Saturation-change accounting. The method driver calls this after writing a trial
    /// saturation update, passing the previous committed saturations.
    pub fn record_saturation_change(&mut self, n: usize, old_s: &[f64]) {
        let np = self.num_phase;
        for j in 0..np {
            self.d_s_nr[n * np + j] = self.flash[n].s[j] - old_s[j];
        }
    }

    pub fn max_saturation_change(&self) -> f64 {
        self.d_s_nr.iter().map(|x| x.abs()).fold(0.0, f64::max)
    }

    /// Captures the current state as the committed snapshot.
    pub fn commit(&mut self) {
        self.last_p.copy_from_slice(&self.p);
        self.last_t.copy_from_slice(&self.t);
        self.last_ni.copy_from_slice(&self.ni);
        self.last_flash.clone_from(&self.flash);
        self.last_rock_vp.copy_from_slice(&self.rock_vp);
        self.last_accelerator.clone_from(&self.accelerator);
    }

    /// Restores the last committed snapshot.
    pub fn restore(&mut self) {
        self.p.copy_from_slice(&self.last_p);
        self.t.copy_from_slice(&self.last_t);
        self.ni.copy_from_slice(&self.last_ni);
        self.flash.clone_from(&self.last_flash);
        self.rock_vp.copy_from_slice(&self.last_rock_vp);
        self.accelerator.clone_from(&self.last_accelerator);
    }

    pub fn total_moles(&self, component: usize) -> f64 {
        let nc = self.num_component;
        (0..self.num_cells).map(|n| self.ni[n * nc + component]).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellGeometry;
    use crate::mixture::black_oil::BlackOilModel;
    use crate::pvt::PvtTable;

    fn flat_cell(depth: f64) -> CellGeometry {
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

    fn one_cell_oil_water() -> Bulk {
        let grid = Grid::uniform(1, 1, 1, flat_cell(8000.0));
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
        Bulk::setup(
            &grid,
            2,
            2,
            vec![model],
            vec![FlowUnit::default_scal()],
            vec![CapillaryPressure::default_pc()],
            vec![RockProperties::default_rock()],
        )
        .unwrap()
    }

    #[test]
    fn setup_sizes_every_per_cell_vector() {
        let bulk = one_cell_oil_water();
        assert_eq!(bulk.num_cells(), 1);
        assert_eq!(bulk.ni_row(0).len(), 2);
    }

    #[test]
    fn check_ni_soft_resets_small_negative_moles() {
        let mut bulk = one_cell_oil_water();
        bulk.ni_row_mut(0)[0] = 1000.0;
        bulk.ni_row_mut(0)[1] = -1.0e-5;
        assert!(matches!(bulk.check_ni(), CheckNiOutcome::SoftReset { .. }));
        assert!(bulk.ni_row(0)[1] > 0.0);
    }

    #[test]
    fn check_ni_flags_retry_for_large_negative_moles() {
        let mut bulk = one_cell_oil_water();
        bulk.ni_row_mut(0)[0] = 1000.0;
        bulk.ni_row_mut(0)[1] = -500.0;
        assert_eq!(bulk.check_ni(), CheckNiOutcome::Retry);
    }

    #[test]
    fn commit_then_restore_round_trips_pressure() {
        let mut bulk = one_cell_oil_water();
        bulk.set_pressure(0, 3000.0);
        bulk.commit();
        bulk.set_pressure(0, 1234.0);
        bulk.restore();
        assert_eq!(bulk.pressure(0), 3000.0);
    }

    #[test]
    fn init_sj_pc_produces_saturations_in_unit_range() {
        let mut bulk = one_cell_oil_water();
        let equil = EquilRegion {
            datum_depth: 8000.0,
            datum_pressure: 3000.0,
            woc_depth: Some(8100.0),
            goc_depth: None,
        };
        bulk.init_sj_pc(&[0], &equil).unwrap();
        let s = &bulk.flash_out(0).s;
        for &sj in s {
            assert!((0.0..=1.0).contains(&sj), "saturation {sj} out of range");
        }
        let sum: f64 = s.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
