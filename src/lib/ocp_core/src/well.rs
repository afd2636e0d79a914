//! `Well` and `Perforation`: source terms coupled into the flow equations,
//! with run-time switching between rate-controlled and BHP-controlled
//! operation.
//!
//! A multi-perforation well over a `MixtureModel`, using a Peaceman
//! well-index derivation (`calculate_well_productivity_index`) and
//! BHP/rate switching logic (`WellControlDecision`/`resolve_well_control`),
//! with well-index computation left to the grid-geometry collaborator (so a
//! caller can also supply an already-known WI from a completion table) and
//! a rate formula that sums `Σj(ξj·xij·krj/μj)` over however many phases
//! the cell's `MixtureModel` carries.

use serde::{Deserialize, Serialize};

use crate::bulk::Bulk;
use crate::mixture::MixtureModel;
use crate::units::{GRAVITY_FACTOR, TINY};

/// Standard surface conditions used to approximate a component's surface
/// molar density for rate reporting, since no region table distinguishes
/// "at reservoir P,T" from "at stock-tank conditions" beyond the
/// `MixtureModel`'s own pressure dependence.
const SURFACE_PRESSURE: f64 = 14.696;
const SURFACE_TEMPERATURE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WellRole {
    Injector,
    Producer,
}

/// The active operating-mode record for a well. `retarget` changes the
/// target value in place without touching open/shut perforation state; a
/// full mode switch (e.g. rate to BHP on constraint violation) replaces the
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WellOpMode {
    Shut,
    RateControlled { target_rate: f64 },
    BhpControlled { bhp: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perforation {
    pub bulk_index: usize,
    pub depth: f64,
    /// Well index, either supplied directly (completion-table style) or
    /// computed by the grid collaborator's Peaceman formula and handed in
    /// at construction.
    pub well_index: f64,
    pub multiplier: f64,
    pub open: bool,
    /// Gravity head offset from the BHP datum down the wellbore to this
    /// perforation, updated by `Well::update_gravity_heads`.
    pub d_g: f64,
}

impl Perforation {
    pub fn new(bulk_index: usize, depth: f64, well_index: f64) -> Self {
        Perforation {
            bulk_index,
            depth,
            well_index,
            multiplier: 1.0,
            open: true,
            d_g: 0.0,
        }
    }
}

/// Cumulative and last-step rate bookkeeping for one well.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WellRateHistory {
    pub last_component_rates: Vec<f64>,
    pub cumulative_component_rates: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPOutcome {
    Ok,
    /// A perforated cell's pressure went non-positive; caller halves `dt`.
    HalveDt,
    /// A constraint limit was hit or crossflow was detected and the mode
    /// (or perforation open/shut state) changed; caller re-solves at the
    /// same `dt`.
    ModeSwitched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Well {
    pub name: String,
    pub group: String,
    pub i: usize,
    pub j: usize,
    pub bhp_datum_depth: f64,
    pub role: WellRole,
    /// Injected-fluid composition, only meaningful when `role ==
    /// Injector`.
    pub injection_zi: Vec<f64>,
    pub perforations: Vec<Perforation>,
    pub bhp: f64,
    pub mode: WellOpMode,
    pub bhp_min: f64,
    pub bhp_max: f64,
    /// Mode overrides keyed by critical-time index.
    pub opt_schedule: Vec<(usize, WellOpMode)>,
    pub rates: WellRateHistory,
}

impl Well {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        i: usize,
        j: usize,
        bhp_datum_depth: f64,
        role: WellRole,
        bhp: f64,
        bhp_min: f64,
        bhp_max: f64,
    ) -> Self {
        Well {
            name: name.into(),
            group: group.into(),
            i,
            j,
            bhp_datum_depth,
            role,
            injection_zi: Vec::new(),
            perforations: Vec::new(),
            bhp,
            mode: WellOpMode::BhpControlled { bhp },
            bhp_min,
            bhp_max,
            opt_schedule: Vec::new(),
            rates: WellRateHistory::default(),
        }
    }

    pub fn add_perforation(&mut self, perf: Perforation) {
        self.perforations.push(perf);
    }

    pub fn is_injector(&self) -> bool {
        matches!(self.role, WellRole::Injector)
    }

    /// Replaces the current mode's target value without otherwise touching
    /// perforation open/shut state.
    pub fn retarget(&mut self, mode: WellOpMode) {
        self.mode = mode;
    }

    /// Resolves and applies the schedule entry active at
    /// `critical_time_index` (the latest entry whose index is `<=` the
    /// given one), if any.
    pub fn apply_schedule(&mut self, critical_time_index: usize) {
        if let Some((_, mode)) = self
            .opt_schedule
            .iter()
            .filter(|(idx, _)| *idx <= critical_time_index)
            .max_by_key(|(idx, _)| *idx)
        {
            self.mode = *mode;
        }
    }

    /// Gravity head `dG` at each perforation: integrates the wellbore
    /// mixture's specific weight from the BHP datum down to the
    /// perforation depth, using the produced-fluid mix (a saturation-
    /// weighted average of each existing phase's density at the
    /// perforation cell) for production, or the injected fluid's own
    /// density for injection.
    pub fn update_gravity_heads(&mut self, bulk: &Bulk, model: &dyn MixtureModel) {
        let injector = self.is_injector();
        let injection_zi = self.injection_zi.clone();
        for perf in &mut self.perforations {
            let gamma = if injector {
                model.rho_phase(self.bhp.max(TINY), SURFACE_TEMPERATURE, &injection_zi) * GRAVITY_FACTOR
            } else {
                let flash = bulk.flash_out(perf.bulk_index);
                let total_s: f64 = flash
                    .phase_exist
                    .iter()
                    .zip(flash.s.iter())
                    .map(|(e, s)| if *e { *s } else { 0.0 })
                    .sum();
                if total_s > TINY {
                    flash
                        .phase_exist
                        .iter()
                        .enumerate()
                        .filter(|(_, e)| **e)
                        .map(|(ph, _)| flash.s[ph] * flash.rho[ph] * GRAVITY_FACTOR)
                        .sum::<f64>()
                        / total_s
                } else {
                    0.0
                }
            };
            perf.d_g = gamma * (perf.depth - self.bhp_datum_depth);
        }
    }

    /// Per-component molar rate [lbmol/day] at one perforation, positive
    /// meaning flow from reservoir to well (production). Injection rates
    /// come back negative in this convention.
    fn perforation_component_rates(&self, perf_idx: usize, bulk: &Bulk, model: &dyn MixtureModel, nc: usize) -> Vec<f64> {
        let perf = &self.perforations[perf_idx];
        if !perf.open || matches!(self.mode, WellOpMode::Shut) {
            return vec![0.0; nc];
        }

        let n = perf.bulk_index;
        let p_cell = bulk.pressure(n);
        let kr = bulk.kr_pc(n);
        let flash = bulk.flash_out(n);
        let bhp_at_perf = self.bhp + perf.d_g;

        if self.is_injector() {
            let drawdown = bhp_at_perf - p_cell;
            let total_mobility: f64 = (0..flash.num_phase)
                .map(|ph| {
                    if flash.phase_exist[ph] && flash.mu[ph] > 0.0 {
                        kr.kr[ph] / flash.mu[ph]
                    } else {
                        0.0
                    }
                })
                .sum();
            let xi_inj = model.xi_phase(bhp_at_perf.max(TINY), SURFACE_TEMPERATURE, &self.injection_zi);
            let factor = perf.well_index * perf.multiplier * xi_inj * total_mobility * drawdown;
            self.injection_zi.iter().map(|zi| -factor * zi).collect()
        } else {
            let drawdown = p_cell - bhp_at_perf;
            let mut out = vec![0.0; nc];
            for ph in 0..flash.num_phase {
                if !flash.phase_exist[ph] || flash.mu[ph] <= 0.0 {
                    continue;
                }
                let mobility = kr.kr[ph] / flash.mu[ph];
                let coeff = perf.well_index * perf.multiplier * flash.xi[ph] * mobility * drawdown;
                for c in 0..nc {
                    out[c] += coeff * flash.xij_at(ph, c);
                }
            }
            out
        }
    }

    /// Total molar rate summed over open perforations, positive meaning
    /// production.
    pub fn total_component_rates(&self, bulk: &Bulk, model: &dyn MixtureModel, nc: usize) -> Vec<f64> {
        let mut total = vec![0.0; nc];
        for idx in 0..self.perforations.len() {
            for (c, v) in self.perforation_component_rates(idx, bulk, model, nc).into_iter().enumerate() {
                total[c] += v;
            }
        }
        total
    }

    /// Surface-condition volumetric rate for one component, converting the
    /// molar rate through the region model's molar density at standard
    /// conditions: STB/day for an oil/water-like component, MSCF/day for a
    /// gas-like one, depending on which standard-condition phase the model
    /// associates with `zi`.
    pub fn surface_rate(model: &dyn MixtureModel, component_molar_rate: f64, zi: &[f64]) -> f64 {
        let xi_sc = model.xi_phase(SURFACE_PRESSURE, SURFACE_TEMPERATURE, zi);
        if xi_sc > 0.0 {
            component_molar_rate / xi_sc
        } else {
            0.0
        }
    }

    /// Solves for the BHP that delivers `target_rate` of
    /// `rate_of(component_rates)`, holding every other per-cell quantity
    /// (kr, mu, xi) frozen at `bulk`'s current state — the same
    /// linearization `resolve_well_control`'s `implied_bhp` formula makes,
    /// generalized to bisection since multi-phase injectivity is not
    /// exactly affine in BHP (`xi_inj` depends weakly on `BHP` through the
    /// injected-fluid PVT table).
    pub fn solve_bhp_for_rate(
        &mut self,
        bulk: &Bulk,
        model: &dyn MixtureModel,
        nc: usize,
        rate_of: impl Fn(&[f64]) -> f64,
        target_rate: f64,
    ) -> f64 {
        let residual = |bhp: f64, well: &mut Well| -> f64 {
            let saved = well.bhp;
            well.bhp = bhp;
            let total = well.total_component_rates(bulk, model, nc);
            well.bhp = saved;
            rate_of(&total) - target_rate
        };

        let (mut lo, mut hi) = (self.bhp_min, self.bhp_max);
        let mut f_lo = residual(lo, self);
        let f_hi = residual(hi, self);
        if f_lo.signum() == f_hi.signum() {
            self.bhp = self.bhp.clamp(self.bhp_min, self.bhp_max);
            return self.bhp;
        }
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            let f_mid = residual(mid, self);
            if f_mid.abs() < 1.0e-9 {
                self.bhp = mid;
                return self.bhp;
            }
            if f_mid.signum() == f_lo.signum() {
                lo = mid;
                f_lo = f_mid;
            } else {
                hi = mid;
            }
        }
        self.bhp = 0.5 * (lo + hi);
        self.bhp
    }

    /// Three-outcome operating-mode check run after a trial solve: fatal (a
    /// perforated cell's pressure collapsed), a constraint/crossflow switch
    /// (re-solve at the same `dt`), or healthy.
    pub fn check_p(&mut self, bulk: &Bulk, model: &dyn MixtureModel, nc: usize) -> CheckPOutcome {
        for perf in &self.perforations {
            if bulk.pressure(perf.bulk_index) <= 0.0 {
                return CheckPOutcome::HalveDt;
            }
        }

        if let WellOpMode::RateControlled { .. } = self.mode {
            if self.is_injector() && self.bhp > self.bhp_max {
                self.mode = WellOpMode::BhpControlled { bhp: self.bhp_max };
                self.bhp = self.bhp_max;
                return CheckPOutcome::ModeSwitched;
            }
            if !self.is_injector() && self.bhp < self.bhp_min {
                self.mode = WellOpMode::BhpControlled { bhp: self.bhp_min };
                self.bhp = self.bhp_min;
                return CheckPOutcome::ModeSwitched;
            }
        }

        let mut crossflow = false;
        for idx in 0..self.perforations.len() {
            if !self.perforations[idx].open {
                continue;
            }
            let rates = self.perforation_component_rates(idx, bulk, model, nc);
            let net: f64 = rates.iter().sum();
            let wrong_direction = if self.is_injector() { net > TINY } else { net < -TINY };
            if wrong_direction {
                self.perforations[idx].open = false;
                crossflow = true;
            }
        }

        if crossflow {
            CheckPOutcome::ModeSwitched
        } else {
            CheckPOutcome::Ok
        }
    }

    /// Rolls the last-step rate into the cumulative total (after a
    /// successful commit) and records it as `last_component_rates`.
    pub fn integrate_rates(&mut self, bulk: &Bulk, model: &dyn MixtureModel, nc: usize, dt_days: f64) {
        let rates = self.total_component_rates(bulk, model, nc);
        if self.rates.cumulative_component_rates.len() != nc {
            self.rates.cumulative_component_rates = vec![0.0; nc];
        }
        for c in 0..nc {
            self.rates.cumulative_component_rates[c] += rates[c] * dt_days;
        }
        self.rates.last_component_rates = rates;
    }
}

/// Field-level rate aggregation across a set of wells: sums every well's
/// last and cumulative component rates, keeping production (positive) and
/// injection (negative) separate since the surface-unit column sets
/// (producer vs injector totals) report them independently.
pub fn field_totals(wells: &[Well], nc: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut prod_rate = vec![0.0; nc];
    let mut inj_rate = vec![0.0; nc];
    let mut prod_cum = vec![0.0; nc];
    let mut inj_cum = vec![0.0; nc];

    for well in wells {
        let last = &well.rates.last_component_rates;
        let cum = &well.rates.cumulative_component_rates;
        if last.len() != nc {
            continue;
        }
        for c in 0..nc {
            if last[c] >= 0.0 {
                prod_rate[c] += last[c];
            } else {
                inj_rate[c] += -last[c];
            }
            if cum.len() == nc {
                if cum[c] >= 0.0 {
                    prod_cum[c] += cum[c];
                } else {
                    inj_cum[c] += -cum[c];
                }
            }
        }
    }
    (prod_rate, inj_rate, prod_cum, inj_cum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capillary::CapillaryPressure;
    use crate::grid::{CellGeometry, Grid};
    use crate::mixture::black_oil::BlackOilModel;
    use crate::pvt::PvtTable;
    use crate::relperm::FlowUnit;
    use crate::rock::RockProperties;

    fn one_cell_bulk() -> (Bulk, BlackOilModel) {
        let grid = Grid::uniform(
            1,
            1,
            1,
            CellGeometry {
                dx: 300.0,
                dy: 300.0,
                dz: 50.0,
                ntg: 1.0,
                porosity: 0.2,
                perm_x: 200.0,
                perm_y: 200.0,
                perm_z: 20.0,
                depth: 8000.0,
                satnum: 0,
                pvtnum: 0,
                rocknum: 0,
                active: true,
            },
        );
        let model = BlackOilModel::oil_water(
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
        );
        let boxed: Box<dyn MixtureModel> = Box::new(model.clone());
        let mut bulk = Bulk::setup(
            &grid,
            2,
            2,
            vec![boxed],
            vec![FlowUnit::default_scal()],
            vec![CapillaryPressure::default_pc()],
            vec![RockProperties::default_rock()],
        )
        .unwrap();
        bulk.set_pressure(0, 4000.0);
        bulk.update_rock_pore_volume_all().unwrap();
        bulk.ni_row_mut(0).copy_from_slice(&[30000.0, 40000.0]);
        bulk.flash_all(false).unwrap();
        (bulk, model)
    }

    fn producer(wi: f64) -> Well {
        let mut well = Well::new("P1", "G1", 0, 0, 8000.0, WellRole::Producer, 3500.0, 500.0, 6000.0);
        well.add_perforation(Perforation::new(0, 8000.0, wi));
        well
    }

    #[test]
    fn producer_produces_when_cell_pressure_exceeds_bhp() {
        let (bulk, model) = one_cell_bulk();
        let well = producer(0.5);
        let rates = well.total_component_rates(&bulk, &model, 2);
        assert!(rates[0] > 0.0, "oil rate should be positive, got {}", rates[0]);
    }

    #[test]
    fn check_p_switches_to_bhp_when_rate_control_would_undershoot_bhp_min() {
        let (bulk, model) = one_cell_bulk();
        let mut well = producer(0.5);
        well.mode = WellOpMode::RateControlled { target_rate: 5000.0 };
        well.bhp = 200.0;
        let outcome = well.check_p(&bulk, &model, 2);
        assert_eq!(outcome, CheckPOutcome::ModeSwitched);
        assert!(matches!(well.mode, WellOpMode::BhpControlled { bhp } if bhp == well.bhp_min));
    }

    #[test]
    fn check_p_is_fatal_when_perforated_cell_pressure_collapses() {
        let (mut bulk, model) = one_cell_bulk();
        bulk.set_pressure(0, -1.0);
        let mut well = producer(0.5);
        assert_eq!(well.check_p(&bulk, &model, 2), CheckPOutcome::HalveDt);
    }

    #[test]
    fn solve_bhp_for_rate_hits_target_within_tolerance() {
        let (bulk, model) = one_cell_bulk();
        let mut well = producer(0.5);
        let target = 400.0;
        well.solve_bhp_for_rate(&bulk, &model, 2, |rates| rates[0], target);
        let rates = well.total_component_rates(&bulk, &model, 2);
        assert!((rates[0] - target).abs() < 1.0, "rate {} vs target {}", rates[0], target);
    }

    #[test]
    fn apply_schedule_picks_the_latest_entry_at_or_before_the_index() {
        let mut well = producer(0.5);
        well.opt_schedule.push((0, WellOpMode::BhpControlled { bhp: 3000.0 }));
        well.opt_schedule.push((5, WellOpMode::RateControlled { target_rate: 1000.0 }));
        well.apply_schedule(3);
        assert!(matches!(well.mode, WellOpMode::BhpControlled { bhp } if bhp == 3000.0));
        well.apply_schedule(10);
        assert!(matches!(well.mode, WellOpMode::RateControlled { target_rate } if target_rate == 1000.0));
    }

    #[test]
    fn field_totals_separate_production_from_injection() {
        let mut wells = Vec::new();
        let mut prod = producer(0.5);
        prod.rates.last_component_rates = vec![100.0, 10.0];
        let mut inj = Well::new("I1", "G1", 1, 0, 8000.0, WellRole::Injector, 4500.0, 500.0, 6000.0);
        inj.rates.last_component_rates = vec![-5.0, -200.0];
        wells.push(prod);
        wells.push(inj);
        let (prod_rate, inj_rate, _, _) = field_totals(&wells, 2);
        assert_eq!(prod_rate[0], 100.0);
        assert_eq!(inj_rate[1], 200.0);
    }
}
