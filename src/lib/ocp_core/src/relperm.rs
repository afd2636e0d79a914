//! Relative permeability: the `FlowUnit` object keyed per SATNUM region.
//!
//! A Corey correlation generalized to the three-phase case (water/oil/gas)
//! using Stone's Model I combination rule for oil relative permeability,
//! with analytic saturation derivatives required by FIM's Jacobian and by
//! IMPES's explicit saturation update.

use serde::{Deserialize, Serialize};

/// A relative-permeability value paired with its derivative w.r.t. the
/// saturation it was evaluated at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrDeriv {
    pub kr: f64,
    pub dkr_ds: f64,
}

impl KrDeriv {
    const ZERO: KrDeriv = KrDeriv { kr: 0.0, dkr_ds: 0.0 };
}

/// Corey-Brooks endpoint and exponent parameters for one SATNUM region.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowUnit {
    /// Connate (irreducible) water saturation.
    pub swco: f64,
    /// Critical gas saturation (below which gas does not flow).
    pub sgc: f64,
    /// Residual oil saturation to water flood.
    pub sorw: f64,
    /// Residual oil saturation to gas flood.
    pub sorg: f64,
    /// Corey exponent, water.
    pub n_w: f64,
    /// Corey exponent, oil (water-oil system).
    pub n_ow: f64,
    /// Corey exponent, oil (gas-oil system).
    pub n_og: f64,
    /// Corey exponent, gas.
    pub n_g: f64,
    /// Water relperm endpoint at `Sw = 1 - Sorw`.
    pub krw_max: f64,
    /// Oil relperm endpoint at `Sw = Swco` (water-oil system).
    pub krow_max: f64,
    /// Oil relperm endpoint at `Sg = 0` (gas-oil system).
    pub krog_max: f64,
    /// Gas relperm endpoint at `Sg = 1 - Swco - Sorg`.
    pub krg_max: f64,
}

impl FlowUnit {
    pub fn default_scal() -> Self {
        Self {
            swco: 0.2,
            sgc: 0.05,
            sorw: 0.2,
            sorg: 0.15,
            n_w: 2.0,
            n_ow: 2.0,
            n_og: 2.0,
            n_g: 2.0,
            krw_max: 1.0,
            krow_max: 1.0,
            krog_max: 1.0,
            krg_max: 1.0,
        }
    }

    /// `krw(Sw)` and `d(krw)/d(Sw)` from SWOF.
    pub fn krw(&self, sw: f64) -> KrDeriv {
        let span = 1.0 - self.swco - self.sorw;
        if span <= f64::EPSILON {
            return KrDeriv::ZERO;
        }
        let s_eff = (sw - self.swco) / span;
        if s_eff <= 0.0 || s_eff >= 1.0 {
            let kr = if s_eff >= 1.0 { self.krw_max } else { 0.0 };
            return KrDeriv { kr, dkr_ds: 0.0 };
        }
        let kr = self.krw_max * s_eff.powf(self.n_w);
        let dkr_ds = self.krw_max * self.n_w * s_eff.powf(self.n_w - 1.0) / span;
        KrDeriv { kr, dkr_ds }
    }

    /// `krow(Sw)` and `d(krow)/d(Sw)` from SWOF.
    pub fn krow(&self, sw: f64) -> KrDeriv {
        let span = 1.0 - self.swco - self.sorw;
        if span <= f64::EPSILON {
            return KrDeriv::ZERO;
        }
        let s_eff = (1.0 - sw - self.sorw) / span;
        if s_eff <= 0.0 || s_eff >= 1.0 {
            let kr = if s_eff >= 1.0 { self.krow_max } else { 0.0 };
            return KrDeriv { kr, dkr_ds: 0.0 };
        }
        let kr = self.krow_max * s_eff.powf(self.n_ow);
        // d(s_eff)/d(Sw) = -1/span
        let dkr_ds = -self.krow_max * self.n_ow * s_eff.powf(self.n_ow - 1.0) / span;
        KrDeriv { kr, dkr_ds }
    }

    /// `krg(Sg)` and `d(krg)/d(Sg)` from SGOF.
    pub fn krg(&self, sg: f64) -> KrDeriv {
        let span = 1.0 - self.swco - self.sorg - self.sgc;
        if span <= f64::EPSILON {
            return KrDeriv::ZERO;
        }
        let s_eff = (sg - self.sgc) / span;
        if s_eff <= 0.0 || s_eff >= 1.0 {
            let kr = if s_eff >= 1.0 { self.krg_max } else { 0.0 };
            return KrDeriv { kr, dkr_ds: 0.0 };
        }
        let kr = self.krg_max * s_eff.powf(self.n_g);
        let dkr_ds = self.krg_max * self.n_g * s_eff.powf(self.n_g - 1.0) / span;
        KrDeriv { kr, dkr_ds }
    }

    /// `krog(Sg)` and `d(krog)/d(Sg)` from SGOF.
    pub fn krog(&self, sg: f64) -> KrDeriv {
        let span = 1.0 - self.swco - self.sorg - self.sgc;
        if span <= f64::EPSILON {
            return KrDeriv::ZERO;
        }
        let s_eff = (1.0 - self.swco - sg - self.sorg) / span;
        if s_eff <= 0.0 || s_eff >= 1.0 {
            let kr = if s_eff >= 1.0 { self.krog_max } else { 0.0 };
            return KrDeriv { kr, dkr_ds: 0.0 };
        }
        let kr = self.krog_max * s_eff.powf(self.n_og);
        let dkr_ds = -self.krog_max * self.n_og * s_eff.powf(self.n_og - 1.0) / span;
        KrDeriv { kr, dkr_ds }
    }

    /// Three-phase oil relative permeability via Stone's Model I, with
    /// derivatives w.r.t. `Sw` and `Sg` taken by finite difference in the
    /// normalized variables (Stone I's closed-form derivative is
    /// algebraically unwieldy; a consistent `dSec/dPri` block is what the
    /// Jacobian needs, not a specific closed form). For two-phase
    /// systems (oil-water or dead-oil/gas-water) callers use
    /// `krow`/`krog` directly instead; this is only exercised once all
    /// three phases coexist.
    pub fn kro_stone1(&self, sw: f64, sg: f64) -> (f64, f64, f64) {
        let som = self.sorw.min(self.sorg).max(1e-6);
        let kro = self.kro_stone1_raw(sw, sg, som);

        let h = 1e-6;
        let kro_dsw = (self.kro_stone1_raw(sw + h, sg, som) - kro) / h;
        let kro_dsg = (self.kro_stone1_raw(sw, sg + h, som) - kro) / h;
        (kro, kro_dsw, kro_dsg)
    }

    fn kro_stone1_raw(&self, sw: f64, sg: f64, som: f64) -> f64 {
        let krow = self.krow(sw);
        let krog = self.krog(sg);
        let so = 1.0 - sw - sg;
        if so <= som {
            return 0.0;
        }
        let denom = (1.0 - som - self.swco).max(1e-9);
        let sw_star = ((sw - self.swco) / denom).clamp(0.0, 1.0);
        let sg_star = (sg / denom).clamp(0.0, 1.0);
        let so_star = ((so - som) / denom).clamp(0.0, 1.0);
        let beta_w = if (1.0 - sw_star).abs() > 1e-12 {
            krow.kr / (self.krow_max * (1.0 - sw_star))
        } else {
            0.0
        };
        let beta_g = if (1.0 - sg_star).abs() > 1e-12 {
            krog.kr / (self.krow_max * (1.0 - sg_star))
        } else {
            0.0
        };
        (self.krow_max * so_star * beta_w * beta_g).clamp(0.0, self.krow_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn krw_is_zero_at_connate_and_endpoint_at_residual() {
        let fu = FlowUnit::default_scal();
        assert_eq!(fu.krw(fu.swco).kr, 0.0);
        assert!((fu.krw(1.0 - fu.sorw).kr - fu.krw_max).abs() < 1e-12);
    }

    #[test]
    fn krw_derivative_matches_finite_difference() {
        let fu = FlowUnit::default_scal();
        let sw = 0.5;
        let h = 1e-6;
        let analytic = fu.krw(sw).dkr_ds;
        let fd = (fu.krw(sw + h).kr - fu.krw(sw - h).kr) / (2.0 * h);
        assert!((analytic - fd).abs() < 1e-5, "{analytic} vs {fd}");
    }

    #[test]
    fn kro_stone1_vanishes_below_minimum_oil_saturation() {
        let fu = FlowUnit::default_scal();
        let (kro, _, _) = fu.kro_stone1(1.0 - fu.sorw, 0.3);
        assert_eq!(kro, 0.0);
    }
}
