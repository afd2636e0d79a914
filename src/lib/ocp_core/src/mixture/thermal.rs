//! `ThermalKValue`: a lighter two-phase hydrocarbon model using only
//! Wilson's K-value correlation, no EoS fugacity refinement.
//!
//! Distinct from [`crate::mixture::compositional::CompositionalEos`]: that
//! model's SSI loop is the accurate, expensive path; this one is the cheap
//! path used when temperature genuinely varies cell-to-cell and a full
//! cubic-EoS fugacity solve per flash would be wasted precision given the
//! Non-goal above.

use crate::error::{OcpError, OcpResult};
use crate::units::TINY;

use super::{FlashOutput, MixtureKind, MixtureModel};

#[derive(Debug, Clone)]
pub struct ThermalComponent {
    pub tc: f64,
    pub pc: f64,
    pub omega: f64,
    pub mw: f64,
}

#[derive(Debug, Clone)]
pub struct ThermalKValue {
    components: Vec<ThermalComponent>,
    xi_w_sc: f64,
    rho_w_sc: f64,
    bw_ref: f64,
    p_ref_w: f64,
    cw: f64,
    mu_w: f64,
}

impl ThermalKValue {
    pub fn new(
        components: Vec<ThermalComponent>,
        xi_w_sc: f64,
        rho_w_sc: f64,
        bw_ref: f64,
        p_ref_w: f64,
        cw: f64,
        mu_w: f64,
    ) -> Self {
        ThermalKValue {
            components,
            xi_w_sc,
            rho_w_sc,
            bw_ref,
            p_ref_w,
            cw,
            mu_w,
        }
    }

    fn nc(&self) -> usize {
        self.components.len()
    }

    fn bw(&self, p: f64) -> f64 {
        self.bw_ref * (1.0 - self.cw * (p - self.p_ref_w))
    }

    fn wilson_k(&self, p: f64, t: f64) -> Vec<f64> {
        self.components
            .iter()
            .map(|c| (c.pc / p) * ((5.373 * (1.0 + c.omega) * (1.0 - c.tc / t)).exp()))
            .collect()
    }

    /// Rachford-Rice two-phase feasibility margin, crossing zero exactly
    /// at a phase-count transition; see the identical derivation in
    /// `CompositionalEos::feasibility_margin`.
    fn feasibility_margin(zi: &[f64], k: &[f64]) -> f64 {
        let g0: f64 = zi.iter().zip(k.iter()).map(|(z, ki)| z * (ki - 1.0)).sum();
        let g1: f64 = zi.iter().zip(k.iter()).map(|(z, ki)| z * (ki - 1.0) / ki).sum();
        g0.min(-g1)
    }

    fn rachford_rice(zi: &[f64], k: &[f64]) -> Option<f64> {
        let g = |beta: f64| -> f64 {
            zi.iter()
                .zip(k.iter())
                .map(|(z, ki)| z * (ki - 1.0) / (1.0 + beta * (ki - 1.0)))
                .sum()
        };
        let k_min = k.iter().cloned().fold(f64::INFINITY, f64::min);
        let k_max = k.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if k_max <= 1.0 || k_min >= 1.0 {
            return None;
        }
        let mut lo = (1.0 / (1.0 - k_max) + TINY).max(0.0);
        let mut hi = (1.0 / (1.0 - k_min) - TINY).min(1.0);
        if lo >= hi {
            return None;
        }
        let (mut g_lo, _) = (g(lo), g(hi));
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            let g_mid = g(mid);
            if g_mid.abs() < 1.0e-12 {
                return Some(mid);
            }
            if g_mid.signum() == g_lo.signum() {
                lo = mid;
                g_lo = g_mid;
            } else {
                hi = mid;
            }
        }
        Some(0.5 * (lo + hi))
    }

    /// Ideal-gas-law molar volume for the liquid/vapor phase, standing in
    /// for a full EoS volume translation; adequate at the coarser fidelity
    /// this variant targets (see module docs).
    fn ideal_molar_volume(&self, p: f64, t: f64, z_factor: f64) -> f64 {
        const R_GAS: f64 = 10.7316;
        z_factor * R_GAS * t / p
    }
}

impl MixtureModel for ThermalKValue {
    fn kind(&self) -> MixtureKind {
        MixtureKind::ThermalKValue
    }

    fn num_phase(&self) -> usize {
        3
    }

    fn num_component(&self) -> usize {
        self.nc() + 1
    }

    fn init_flash_by_saturation(
        &self,
        p: f64,
        t: f64,
        s: &[f64],
        pore_volume: f64,
        zi: &[f64],
        out: &mut FlashOutput,
    ) -> OcpResult<()> {
        let nc = self.nc();
        let hc_volume = (s[0] + s[1]) * pore_volume;
        let water_volume = s[2] * pore_volume;

        let mut ni = vec![0.0; nc + 1];
        if hc_volume > TINY {
            let v = self.ideal_molar_volume(p, t, 0.9);
            let total_moles = hc_volume / v;
            for i in 0..nc {
                ni[i] = total_moles * zi[i];
            }
        }
        ni[nc] = (water_volume / self.bw(p)) * self.xi_w_sc;

        self.flash_by_moles(p, t, &ni, out)
    }

    fn flash_by_moles(&self, p: f64, t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        let nc = self.nc();
        if ni.len() != nc + 1 {
            return Err(OcpError::MalformedInput(format!(
                "thermal K-value flash expected {} component moles, got {}",
                nc + 1,
                ni.len()
            )));
        }
        *out = FlashOutput::sized(3, nc + 1);

        let nw = ni[nc];
        let n_hc: f64 = ni[..nc].iter().sum();

        if nw > TINY {
            let bw = self.bw(p);
            let nw_stb = nw / self.xi_w_sc;
            out.phase_exist[2] = true;
            out.v[2] = nw_stb * bw;
            out.nj[2] = nw;
            out.rho[2] = self.rho_w_sc / bw;
            out.xi[2] = self.xi_w_sc / bw;
            out.mu[2] = self.mu_w;
            out.set_xij(2, nc, 1.0);
        }

        if n_hc > TINY {
            let zi: Vec<f64> = ni[..nc].iter().map(|n| n / n_hc).collect();
            let k = self.wilson_k(p, t);
            out.stability_margin = Some(Self::feasibility_margin(&zi, &k));

            match Self::rachford_rice(&zi, &k) {
                Some(beta) if beta > TINY && beta < 1.0 - TINY => {
                    let mut x = vec![0.0; nc];
                    let mut y = vec![0.0; nc];
                    for i in 0..nc {
                        let denom = 1.0 + beta * (k[i] - 1.0);
                        x[i] = zi[i] / denom;
                        y[i] = k[i] * x[i];
                    }
                    let sx: f64 = x.iter().sum();
                    let sy: f64 = y.iter().sum();
                    for i in 0..nc {
                        x[i] /= sx;
                        y[i] /= sy;
                    }

                    let no = (1.0 - beta) * n_hc;
                    let ng = beta * n_hc;
                    let vl = self.ideal_molar_volume(p, t, 0.2);
                    let vv = self.ideal_molar_volume(p, t, 0.9);

                    out.phase_exist[0] = true;
                    out.v[0] = no * vl;
                    out.nj[0] = no;
                    out.xi[0] = 1.0 / vl;
                    let mw_o: f64 = x.iter().zip(self.components.iter()).map(|(xi, c)| xi * c.mw).sum();
                    out.rho[0] = mw_o / vl;
                    for (i, xi) in x.iter().enumerate() {
                        out.set_xij(0, i, *xi);
                    }

                    out.phase_exist[1] = true;
                    out.v[1] = ng * vv;
                    out.nj[1] = ng;
                    out.xi[1] = 1.0 / vv;
                    let mw_g: f64 = y.iter().zip(self.components.iter()).map(|(yi, c)| yi * c.mw).sum();
                    out.rho[1] = mw_g / vv;
                    for (i, yi) in y.iter().enumerate() {
                        out.set_xij(1, i, *yi);
                    }
                }
                Some(beta) if beta >= 1.0 - TINY => {
                    let v = self.ideal_molar_volume(p, t, 0.9);
                    out.phase_exist[1] = true;
                    out.v[1] = n_hc * v;
                    out.nj[1] = n_hc;
                    out.xi[1] = 1.0 / v;
                    let mw: f64 = zi.iter().zip(self.components.iter()).map(|(z, c)| z * c.mw).sum();
                    out.rho[1] = mw / v;
                    for (i, z) in zi.iter().enumerate() {
                        out.set_xij(1, i, *z);
                    }
                }
                _ => {
                    let v = self.ideal_molar_volume(p, t, 0.2);
                    out.phase_exist[0] = true;
                    out.v[0] = n_hc * v;
                    out.nj[0] = n_hc;
                    out.xi[0] = 1.0 / v;
                    let mw: f64 = zi.iter().zip(self.components.iter()).map(|(z, c)| z * c.mw).sum();
                    out.rho[0] = mw / v;
                    for (i, z) in zi.iter().enumerate() {
                        out.set_xij(0, i, *z);
                    }
                }
            }
        }

        let vf: f64 = out.v.iter().sum();
        if vf <= 0.0 {
            return Err(OcpError::EmptyCell { bulk: 0 });
        }
        for j in 0..3 {
            out.s[j] = if out.phase_exist[j] { out.v[j] / vf } else { 0.0 };
        }
        out.vf = vf;
        Ok(())
    }

    fn flash_deriv(&self, p: f64, t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        self.flash_by_moles(p, t, ni, out)?;

        let hp = (p * 1.0e-6).max(1.0e-4);
        let mut plus = out.clone();
        let mut minus = out.clone();
        self.flash_by_moles(p + hp, t, ni, &mut plus)?;
        self.flash_by_moles(p - hp, t, ni, &mut minus)?;
        out.vfp = (plus.vf - minus.vf) / (2.0 * hp);

        let nc = ni.len();
        out.vfi = vec![0.0; nc];
        for c in 0..nc {
            let hn = (ni[c].abs() * 1.0e-6).max(1.0e-6);
            let mut perturbed = ni.to_vec();
            perturbed[c] += hn;
            let mut pf = out.clone();
            self.flash_by_moles(p, t, &perturbed, &mut pf)?;
            perturbed[c] = ni[c] - hn;
            let mut mf = out.clone();
            self.flash_by_moles(p, t, &perturbed, &mut mf)?;
            out.vfi[c] = (pf.vf - mf.vf) / (2.0 * hn);
        }
        out.d_sec_d_pri.clear();
        out.d_sec_d_pri_rows = 0;
        Ok(())
    }

    fn xi_phase(&self, p: f64, t: f64, zi: &[f64]) -> f64 {
        if zi.len() > self.nc() {
            return self.xi_w_sc / self.bw(p);
        }
        1.0 / self.ideal_molar_volume(p, t, 0.5)
    }

    fn rho_phase(&self, p: f64, t: f64, zi: &[f64]) -> f64 {
        if zi.len() > self.nc() {
            return self.rho_w_sc / self.bw(p);
        }
        let v = self.ideal_molar_volume(p, t, 0.5);
        let mw: f64 = zi.iter().zip(self.components.iter()).map(|(z, c)| z * c.mw).sum();
        mw / v
    }

    fn gamma_phase_o(&self, p_in: f64) -> f64 {
        use crate::units::GRAVITY_FACTOR;
        let zi: Vec<f64> = self.components.iter().map(|_| 1.0 / self.nc() as f64).collect();
        self.rho_phase(p_in, 600.0, &zi) * GRAVITY_FACTOR
    }

    fn gamma_phase_w(&self, p_in: f64) -> f64 {
        use crate::units::GRAVITY_FACTOR;
        (self.rho_w_sc / self.bw(p_in)) * GRAVITY_FACTOR
    }

    fn gamma_phase_g(&self, p_in: f64) -> f64 {
        self.gamma_phase_o(p_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ThermalKValue {
        let c1 = ThermalComponent {
            tc: 343.0,
            pc: 667.0,
            omega: 0.0115,
            mw: 16.04,
        };
        let c3 = ThermalComponent {
            tc: 666.0,
            pc: 617.0,
            omega: 0.1523,
            mw: 44.1,
        };
        ThermalKValue::new(vec![c1, c3], 350.0, 62.4, 1.0, 3000.0, 3.0e-6, 0.5)
    }

    #[test]
    fn hydrocarbon_mole_total_is_conserved_across_phases() {
        let m = model();
        let mut out = FlashOutput::sized(3, 3);
        m.flash_by_moles(800.0, 600.0, &[40.0, 60.0, 0.0], &mut out).unwrap();
        let total: f64 = out.nj.iter().sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn temperature_shifts_the_vapor_fraction() {
        let m = model();
        let mut cold = FlashOutput::sized(3, 3);
        m.flash_by_moles(800.0, 500.0, &[40.0, 60.0, 0.0], &mut cold).unwrap();
        let mut hot = FlashOutput::sized(3, 3);
        m.flash_by_moles(800.0, 700.0, &[40.0, 60.0, 0.0], &mut hot).unwrap();
        assert!(hot.s[1] >= cold.s[1]);
    }
}
