//! Black-oil `MixtureModel` family: `Water`, `OilWater`, `DeadOilGasWater`,
//! `LiveOilDryGasWater`.
//!
//! Built from `PvtTable` curves rather than hard-coded correlations.
//! Multi-variable `PVTO` (Bo, Rs, mu_o all tabulated jointly vs. pressure
//! *and* bubble point) is out of scope; property tables are simplified to
//! the single-pressure-dependent case, so `Rs`, `Bo`, `mu_o` are each a
//! `PvtTable` of pressure only, and the undersaturated branch (no free gas)
//! folds dissolved-gas volume entirely into `Bo(P)` rather than solving a
//! true bubble-point-tracking state. This is a deliberate, documented
//! simplification (see `DESIGN.md`).
//!
//! Every variant shares one phase/component ordering: a phase exists iff its
//! same-named component is present in `BlackOilKind::components()`, so
//! `num_phase() == num_component()` always and index `i` in every `FlashOutput`
//! array refers to the same conceptual fluid across `s`, `rho`, `xi`, `mu`,
//! `v`, `nj`, and the diagonal of `xij`.

use crate::error::{OcpError, OcpResult};
use crate::pvt::PvtTable;
use crate::units::TINY;

use super::{FlashOutput, MixtureKind, MixtureModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Oil,
    Gas,
    Water,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlackOilKind {
    Water,
    OilWater,
    DeadOilGasWater,
    LiveOilDryGasWater,
}

impl BlackOilKind {
    pub fn components(&self) -> &'static [Component] {
        match self {
            BlackOilKind::Water => &[Component::Water],
            BlackOilKind::OilWater => &[Component::Oil, Component::Water],
            BlackOilKind::DeadOilGasWater | BlackOilKind::LiveOilDryGasWater => {
                &[Component::Oil, Component::Gas, Component::Water]
            }
        }
    }

    fn index_of(&self, c: Component) -> Option<usize> {
        self.components().iter().position(|x| *x == c)
    }

    fn mixture_kind(&self) -> MixtureKind {
        match self {
            BlackOilKind::Water => MixtureKind::Water,
            BlackOilKind::OilWater => MixtureKind::OilWater,
            BlackOilKind::DeadOilGasWater => MixtureKind::DeadOilGasWater,
            BlackOilKind::LiveOilDryGasWater => MixtureKind::LiveOilDryGasWater,
        }
    }

    fn has_gas(&self) -> bool {
        matches!(self, BlackOilKind::DeadOilGasWater | BlackOilKind::LiveOilDryGasWater)
    }

    fn allows_solution_gas(&self) -> bool {
        matches!(self, BlackOilKind::LiveOilDryGasWater)
    }

    fn has_oil(&self) -> bool {
        self.has_gas() || matches!(self, BlackOilKind::OilWater)
    }
}

/// One region's full black-oil PVT deck, reduced to the pressure-only
/// tables this module's simplification supports.
#[derive(Debug, Clone)]
pub struct BlackOilModel {
    kind: BlackOilKind,
    bo: PvtTable,
    mu_o: PvtTable,
    rs: PvtTable,
    bg: PvtTable,
    mu_g: PvtTable,
    bw_ref: f64,
    p_ref_w: f64,
    cw: f64,
    mu_w: f64,
    /// Molar density of each component at standard conditions, in
    /// lbmol per surface-volume-unit (stb for oil/water, Mscf for gas).
    xi_o_sc: f64,
    xi_g_sc: f64,
    xi_w_sc: f64,
    /// Mass density of each component at standard conditions, lbm per the
    /// same surface-volume-unit.
    rho_o_sc: f64,
    rho_g_sc: f64,
    rho_w_sc: f64,
}

impl BlackOilModel {
    pub fn water(bw_ref: f64, p_ref_w: f64, cw: f64, mu_w: f64, xi_w_sc: f64, rho_w_sc: f64) -> Self {
        BlackOilModel {
            kind: BlackOilKind::Water,
            bo: PvtTable::constant(1.0),
            mu_o: PvtTable::constant(1.0),
            rs: PvtTable::constant(0.0),
            bg: PvtTable::constant(1.0),
            mu_g: PvtTable::constant(1.0),
            bw_ref,
            p_ref_w,
            cw,
            mu_w,
            xi_o_sc: 1.0,
            xi_g_sc: 1.0,
            xi_w_sc,
            rho_o_sc: 1.0,
            rho_g_sc: 1.0,
            rho_w_sc,
        }
    }

    pub fn oil_water(
        bo: PvtTable,
        mu_o: PvtTable,
        bw_ref: f64,
        p_ref_w: f64,
        cw: f64,
        mu_w: f64,
        xi_o_sc: f64,
        xi_w_sc: f64,
        rho_o_sc: f64,
        rho_w_sc: f64,
    ) -> Self {
        BlackOilModel {
            kind: BlackOilKind::OilWater,
            bo,
            mu_o,
            rs: PvtTable::constant(0.0),
            bg: PvtTable::constant(1.0),
            mu_g: PvtTable::constant(1.0),
            bw_ref,
            p_ref_w,
            cw,
            mu_w,
            xi_o_sc,
            xi_g_sc: 1.0,
            xi_w_sc,
            rho_o_sc,
            rho_g_sc: 1.0,
            rho_w_sc,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dead_oil_gas_water(
        bo: PvtTable,
        mu_o: PvtTable,
        bg: PvtTable,
        mu_g: PvtTable,
        bw_ref: f64,
        p_ref_w: f64,
        cw: f64,
        mu_w: f64,
        xi_o_sc: f64,
        xi_g_sc: f64,
        xi_w_sc: f64,
        rho_o_sc: f64,
        rho_g_sc: f64,
        rho_w_sc: f64,
    ) -> Self {
        BlackOilModel {
            kind: BlackOilKind::DeadOilGasWater,
            bo,
            mu_o,
            rs: PvtTable::constant(0.0),
            bg,
            mu_g,
            bw_ref,
            p_ref_w,
            cw,
            mu_w,
            xi_o_sc,
            xi_g_sc,
            xi_w_sc,
            rho_o_sc,
            rho_g_sc,
            rho_w_sc,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn live_oil_dry_gas_water(
        bo: PvtTable,
        mu_o: PvtTable,
        rs: PvtTable,
        bg: PvtTable,
        mu_g: PvtTable,
        bw_ref: f64,
        p_ref_w: f64,
        cw: f64,
        mu_w: f64,
        xi_o_sc: f64,
        xi_g_sc: f64,
        xi_w_sc: f64,
        rho_o_sc: f64,
        rho_g_sc: f64,
        rho_w_sc: f64,
    ) -> Self {
        BlackOilModel {
            kind: BlackOilKind::LiveOilDryGasWater,
            bo,
            mu_o,
            rs,
            bg,
            mu_g,
            bw_ref,
            p_ref_w,
            cw,
            mu_w,
            xi_o_sc,
            xi_g_sc,
            xi_w_sc,
            rho_o_sc,
            rho_g_sc,
            rho_w_sc,
        }
    }

    fn bw_and_slope(&self, p: f64) -> (f64, f64) {
        (self.bw_ref * (1.0 - self.cw * (p - self.p_ref_w)), -self.bw_ref * self.cw)
    }

    /// Dissolved-gas moles the oil phase can hold at `(P, No)`, zero unless
    /// the variant allows solution gas.
    fn dissolved_capacity(&self, p: f64, no: f64) -> (f64, f64, f64) {
        if !self.kind.allows_solution_gas() {
            return (0.0, 0.0, 0.0);
        }
        let (rs_val, drs_dp) = self.rs.value_and_slope(p);
        let rs_mole_factor = self.xi_g_sc / self.xi_o_sc;
        let capacity = rs_val * rs_mole_factor * no;
        (capacity, drs_dp * rs_mole_factor * no, rs_val * rs_mole_factor)
    }

    fn oil_idx(&self) -> Option<usize> {
        self.kind.index_of(Component::Oil)
    }
    fn gas_idx(&self) -> Option<usize> {
        self.kind.index_of(Component::Gas)
    }
    fn wat_idx(&self) -> Option<usize> {
        self.kind.index_of(Component::Water)
    }

    /// The shared flash implementation: both `flash_by_moles` and
    /// `flash_deriv` call this. The distinction between the two is about
    /// which outputs the caller reads, not a cheaper code path — the
    /// derivative terms here are closed-form and not worth gating.
    fn flash(&self, p: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        let nc = self.kind.components().len();
        if ni.len() != nc {
            return Err(OcpError::MalformedInput(format!(
                "black-oil flash expected {nc} component moles, got {}",
                ni.len()
            )));
        }
        *out = FlashOutput::sized(nc, nc);

        let no = self.oil_idx().map(|i| ni[i]).unwrap_or(0.0);
        let ng_total = self.gas_idx().map(|i| ni[i]).unwrap_or(0.0);
        let nw = self.wat_idx().map(|i| ni[i]).unwrap_or(0.0);

        let (capacity, dcap_dp, dcap_dno) = self.dissolved_capacity(p, no);
        let ng_free = (ng_total - capacity).max(0.0);
        let gas_is_free = self.kind.has_gas() && ng_free > TINY;

        let mut phase_dv_dp = vec![0.0; nc];
        let mut phase_dv_dn = vec![vec![0.0; nc]; nc];

        if self.kind.has_oil() && no > TINY {
            let idx = self.oil_idx().unwrap();
            let (bo, dbo) = self.bo.value_and_slope(p);
            let no_stb = no / self.xi_o_sc;
            let v_oil = no_stb * bo;

            out.phase_exist[idx] = true;
            out.v[idx] = v_oil;
            out.nj[idx] = no;
            phase_dv_dp[idx] = no_stb * dbo;
            phase_dv_dn[idx][idx] = bo / self.xi_o_sc;

            let ng_dissolved_surf = if gas_is_free {
                (ng_total - ng_free) / self.xi_g_sc
            } else {
                (capacity.min(ng_total)).max(0.0) / self.xi_g_sc
            };
            let n_dissolved_moles = ng_dissolved_surf * self.xi_g_sc;
            let total_oil_phase_moles = no + n_dissolved_moles;

            out.rho[idx] = (no_stb * self.rho_o_sc + ng_dissolved_surf * self.rho_g_sc) / v_oil;
            out.xi[idx] = total_oil_phase_moles / v_oil;
            out.mu[idx] = self.mu_o.value(p);
            out.set_xij(idx, idx, no / total_oil_phase_moles);
            if let Some(g) = self.gas_idx() {
                out.set_xij(idx, g, n_dissolved_moles / total_oil_phase_moles);
            }
        }

        if self.kind.has_gas() {
            let idx = self.gas_idx().unwrap();
            if gas_is_free {
                let (bg, dbg) = self.bg.value_and_slope(p);
                let ng_free_surf = ng_free / self.xi_g_sc;
                let v_gas = ng_free_surf * bg;

                out.phase_exist[idx] = true;
                out.v[idx] = v_gas;
                out.nj[idx] = ng_free;
                out.rho[idx] = self.rho_g_sc / bg;
                out.xi[idx] = self.xi_g_sc / bg;
                out.mu[idx] = self.mu_g.value(p);
                out.set_xij(idx, idx, 1.0);

                let dng_free_dp = -dcap_dp;
                let dng_free_dno = -dcap_dno;
                phase_dv_dp[idx] = (dng_free_dp / self.xi_g_sc) * bg + ng_free_surf * dbg;
                if let Some(o) = self.oil_idx() {
                    phase_dv_dn[idx][o] = (dng_free_dno / self.xi_g_sc) * bg;
                }
                phase_dv_dn[idx][idx] = bg / self.xi_g_sc;
            }
        }

        if nw > TINY {
            let idx = self.wat_idx().expect("every black-oil variant carries a water component");
            let (bw, dbw) = self.bw_and_slope(p);
            let nw_stb = nw / self.xi_w_sc;
            let v_water = nw_stb * bw;

            out.phase_exist[idx] = true;
            out.v[idx] = v_water;
            out.nj[idx] = nw;
            out.rho[idx] = self.rho_w_sc / bw;
            out.xi[idx] = self.xi_w_sc / bw;
            out.mu[idx] = self.mu_w;
            out.set_xij(idx, idx, 1.0);

            phase_dv_dp[idx] = nw_stb * dbw;
            phase_dv_dn[idx][idx] = bw / self.xi_w_sc;
        }

        let vf: f64 = out.v.iter().sum();
        if vf <= 0.0 {
            return Err(OcpError::EmptyCell { bulk: 0 });
        }
        for j in 0..nc {
            out.s[j] = if out.phase_exist[j] { out.v[j] / vf } else { 0.0 };
        }

        out.vf = vf;
        out.vfp = phase_dv_dp.iter().sum();
        out.vfi = (0..nc).map(|c| (0..nc).map(|j| phase_dv_dn[j][c]).sum()).collect();

        let mut rows = Vec::with_capacity(nc * (nc + 1));
        for j in 0..nc {
            rows.push((phase_dv_dp[j] - out.s[j] * out.vfp) / vf);
            for c in 0..nc {
                rows.push((phase_dv_dn[j][c] - out.s[j] * out.vfi[c]) / vf);
            }
        }
        out.d_sec_d_pri = rows;
        out.d_sec_d_pri_rows = nc;

        out.stability_margin = if self.kind.allows_solution_gas() && no > TINY {
            Some((capacity - ng_total) / no)
        } else {
            None
        };

        Ok(())
    }

    fn dominant_component(&self, zi: &[f64]) -> usize {
        zi.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

impl MixtureModel for BlackOilModel {
    fn kind(&self) -> MixtureKind {
        self.kind.mixture_kind()
    }

    fn num_phase(&self) -> usize {
        self.kind.components().len()
    }

    fn num_component(&self) -> usize {
        self.kind.components().len()
    }

    fn init_flash_by_saturation(
        &self,
        p: f64,
        _t: f64,
        s: &[f64],
        pore_volume: f64,
        _zi: &[f64],
        out: &mut FlashOutput,
    ) -> OcpResult<()> {
        let nc = self.kind.components().len();
        if s.len() != nc {
            return Err(OcpError::MalformedInput(format!(
                "expected {nc} initial saturations, got {}",
                s.len()
            )));
        }
        let mut ni = vec![0.0; nc];

        let mut dissolved_from_oil = 0.0;
        if let Some(o) = self.oil_idx() {
            let (bo, _) = self.bo.value_and_slope(p);
            let v_oil = s[o] * pore_volume;
            let no_stb = v_oil / bo;
            let no = no_stb * self.xi_o_sc;
            ni[o] = no;
            if self.kind.allows_solution_gas() {
                let (rs_val, _) = self.rs.value_and_slope(p);
                dissolved_from_oil = rs_val * (self.xi_g_sc / self.xi_o_sc) * no;
            }
        }
        if let Some(g) = self.gas_idx() {
            let (bg, _) = self.bg.value_and_slope(p);
            let v_gas = s[g] * pore_volume;
            let ng_free_surf = v_gas / bg;
            ni[g] = ng_free_surf * self.xi_g_sc + dissolved_from_oil;
        }
        if let Some(w) = self.wat_idx() {
            let (bw, _) = self.bw_and_slope(p);
            let v_water = s[w] * pore_volume;
            ni[w] = (v_water / bw) * self.xi_w_sc;
        }

        self.flash(p, &ni, out)
    }

    fn flash_by_moles(&self, p: f64, _t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        self.flash(p, ni, out)
    }

    fn flash_deriv(&self, p: f64, _t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        self.flash(p, ni, out)
    }

    fn xi_phase(&self, p: f64, _t: f64, zi: &[f64]) -> f64 {
        match self.kind.components()[self.dominant_component(zi)] {
            Component::Oil => self.xi_o_sc / self.bo.value(p),
            Component::Gas => self.xi_g_sc / self.bg.value(p),
            Component::Water => self.xi_w_sc / self.bw_and_slope(p).0,
        }
    }

    fn rho_phase(&self, p: f64, _t: f64, zi: &[f64]) -> f64 {
        match self.kind.components()[self.dominant_component(zi)] {
            Component::Oil => self.rho_o_sc / self.bo.value(p),
            Component::Gas => self.rho_g_sc / self.bg.value(p),
            Component::Water => self.rho_w_sc / self.bw_and_slope(p).0,
        }
    }

    fn gamma_phase_o(&self, p_in: f64) -> f64 {
        use crate::units::GRAVITY_FACTOR;
        (self.rho_o_sc / self.bo.value(p_in)) * GRAVITY_FACTOR
    }

    fn gamma_phase_w(&self, p_in: f64) -> f64 {
        use crate::units::GRAVITY_FACTOR;
        (self.rho_w_sc / self.bw_and_slope(p_in).0) * GRAVITY_FACTOR
    }

    fn gamma_phase_g(&self, p_in: f64) -> f64 {
        use crate::units::GRAVITY_FACTOR;
        (self.rho_g_sc / self.bg.value(p_in)) * GRAVITY_FACTOR
    }
}
