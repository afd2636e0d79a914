//! Capillary pressure: `Pcow(Sw)` and `Pcgo(Sg)` with derivatives.
//!
//! A Brooks-Corey `CapillaryPressure` covering both the water-oil and
//! gas-oil contacts needed by `Bulk::init_sj_pc`.

use serde::{Deserialize, Serialize};

use crate::relperm::FlowUnit;

/// A capillary pressure value paired with its derivative w.r.t. saturation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcDeriv {
    pub pc: f64,
    pub dpc_ds: f64,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct CapillaryPressure {
    /// Oil-water entry (displacement) pressure [psia].
    pub pe_ow: f64,
    /// Gas-oil entry pressure [psia].
    pub pe_go: f64,
    /// Brooks-Corey exponent (lambda), water-oil curve.
    pub lambda_ow: f64,
    /// Brooks-Corey exponent (lambda), gas-oil curve.
    pub lambda_go: f64,
    /// Clamp ceiling for both curves [psia].
    pub pc_max: f64,
}

impl CapillaryPressure {
    pub fn default_pc() -> Self {
        Self {
            pe_ow: 5.0,
            pe_go: 2.0,
            lambda_ow: 2.0,
            lambda_go: 2.0,
            pc_max: 500.0,
        }
    }

    /// Oil-water capillary pressure `Pc = Po - Pw` at water saturation
    /// `sw`, and its derivative w.r.t. `sw`.
    pub fn pcow(&self, sw: f64, scal: &FlowUnit) -> PcDeriv {
        let denom = (1.0 - scal.swco - scal.sorw).max(1e-9);
        let s_eff = ((sw - scal.swco) / denom).clamp(1e-6, 1.0);
        if s_eff >= 1.0 - 1e-9 {
            return PcDeriv { pc: 0.0, dpc_ds: 0.0 };
        }
        let pc = (self.pe_ow * s_eff.powf(-1.0 / self.lambda_ow)).clamp(0.0, self.pc_max);
        let raw_dpc = -self.pe_ow / self.lambda_ow * s_eff.powf(-1.0 / self.lambda_ow - 1.0) / denom;
        let dpc_ds = if pc >= self.pc_max { 0.0 } else { raw_dpc };
        PcDeriv { pc, dpc_ds }
    }

    /// Gas-oil capillary pressure `Pc = Pg - Po` at gas saturation `sg`,
    /// and its derivative w.r.t. `sg`.
    pub fn pcgo(&self, sg: f64, scal: &FlowUnit) -> PcDeriv {
        let denom = (1.0 - scal.swco - scal.sorg - scal.sgc).max(1e-9);
        let s_eff = ((sg - scal.sgc) / denom).clamp(1e-6, 1.0);
        if s_eff >= 1.0 - 1e-9 {
            return PcDeriv { pc: self.pc_max, dpc_ds: 0.0 };
        }
        let pc = (self.pe_go * s_eff.powf(1.0 / self.lambda_go)).clamp(0.0, self.pc_max);
        let raw_dpc = self.pe_go / self.lambda_go * s_eff.powf(1.0 / self.lambda_go - 1.0) / denom;
        let dpc_ds = if pc >= self.pc_max { 0.0 } else { raw_dpc };
        PcDeriv { pc, dpc_ds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcow_vanishes_at_residual_oil_saturation() {
        let pc = CapillaryPressure::default_pc();
        let scal = FlowUnit::default_scal();
        let sw = 1.0 - scal.sorw;
        assert!(pc.pcow(sw, &scal).pc < 1e-6);
    }

    #[test]
    fn pcow_derivative_matches_finite_difference() {
        let pc = CapillaryPressure::default_pc();
        let scal = FlowUnit::default_scal();
        let sw = 0.4;
        let h = 1e-6;
        let analytic = pc.pcow(sw, &scal).dpc_ds;
        let fd = (pc.pcow(sw + h, &scal).pc - pc.pcow(sw - h, &scal).pc) / (2.0 * h);
        assert!((analytic - fd).abs() < 1e-3, "{analytic} vs {fd}");
    }
}
