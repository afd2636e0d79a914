//! `MixtureModel`: the polymorphic fluid-behaviour family.
//!
//! Each variant is a tagged implementation dispatched by trait object
//! rather than virtual dispatch, and every call fills an explicit
//! `FlashOutput` scratch struct so the model itself stays stateless and
//! flash calls are re-entrant. `Bulk` owns one `FlashOutput` per cell and
//! one `MixtureModel` per PVTNUM region; many cells in the same region
//! share the same model instance.

pub mod black_oil;
pub mod compositional;
pub mod thermal;
pub mod accelerator;

use crate::error::OcpResult;

/// Which concrete variant a `MixtureModel` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixtureKind {
    Water,
    OilWater,
    DeadOilGasWater,
    LiveOilDryGasWater,
    CompositionalEos,
    ThermalKValue,
}

/// The explicit scratch a flash call fills in, replacing the original
/// `Mixture` base class's protected mutable fields. Sized to `Np` phases
/// and `Nc` components by `Bulk::setup` for a region's model; every
/// `MixtureModel::*flash*` call overwrites all of it.
#[derive(Debug, Clone, Default)]
pub struct FlashOutput {
    pub num_phase: usize,
    pub num_component: usize,
    /// Existence flag per phase, length `Np`.
    pub phase_exist: Vec<bool>,
    /// Saturation per phase, length `Np`; maintained even for an absent
    /// phase.
    pub s: Vec<f64>,
    /// Mass density per phase [lbm/rb], length `Np`; undefined (not read)
    /// for an absent phase.
    pub rho: Vec<f64>,
    /// Molar density per phase [lbmol/rb], length `Np`.
    pub xi: Vec<f64>,
    /// Viscosity per phase [cP], length `Np`.
    pub mu: Vec<f64>,
    /// Volume per phase [rb], length `Np`.
    pub v: Vec<f64>,
    /// Component mole fraction within each phase, flattened `Np * Nc`
    /// (row-major: phase-major, `xij[j * Nc + i]`).
    pub xij: Vec<f64>,
    /// Total moles of each phase, length `Np`.
    pub nj: Vec<f64>,
    /// Total fluid (reservoir) volume [rb], `Σj v[j]`.
    pub vf: f64,
    /// `∂Vf/∂P`.
    pub vfp: f64,
    /// `∂Vf/∂Ni`, length `Nc`.
    pub vfi: Vec<f64>,
    /// Secondary-on-primary Jacobian block for FIM, row-major, with a
    /// variable row count per cell so differently-sized blocks stay
    /// contiguous instead of padded to a fixed per-phase layout.
    pub d_sec_d_pri: Vec<f64>,
    pub d_sec_d_pri_rows: usize,
    /// A real, model-computed scalar distance from the nearest
    /// phase-count transition this flash can detect: the Rachford-Rice
    /// feasibility margin `min(Σzi(Ki-1), -Σzi(Ki-1)/Ki)` for the two
    /// hydrocarbon models, or the bubble-point distance
    /// `(capacity - Nfree_gas) / No` for black-oil solution-gas tracking.
    /// `None` when the variant has no such boundary to track (e.g. pure
    /// water, or a black-oil kind with no solution gas). Feeds
    /// [`crate::mixture::accelerator::FlashTypeTracker`]'s trust region.
    pub stability_margin: Option<f64>,
}

impl FlashOutput {
    pub fn sized(num_phase: usize, num_component: usize) -> Self {
        FlashOutput {
            num_phase,
            num_component,
            phase_exist: vec![false; num_phase],
            s: vec![0.0; num_phase],
            rho: vec![0.0; num_phase],
            xi: vec![0.0; num_phase],
            mu: vec![0.0; num_phase],
            v: vec![0.0; num_phase],
            xij: vec![0.0; num_phase * num_component],
            nj: vec![0.0; num_phase],
            vf: 0.0,
            vfp: 0.0,
            vfi: vec![0.0; num_component],
            d_sec_d_pri: Vec::new(),
            d_sec_d_pri_rows: 0,
            stability_margin: None,
        }
    }

    pub fn xij_at(&self, phase: usize, component: usize) -> f64 {
        self.xij[phase * self.num_component + component]
    }

    pub fn set_xij(&mut self, phase: usize, component: usize, value: f64) {
        self.xij[phase * self.num_component + component] = value;
    }

    /// Maximum contiguous row count a secondary/primary block could need
    /// for this phase/component count: `(Nc+1)^2 * Np`.
    pub fn max_len_d_sec_d_pri(&self) -> usize {
        (self.num_component + 1).pow(2) * self.num_phase
    }
}

/// Shared capability set of every fluid model.
/// All methods are `&self` — no interior mutation — so a single model
/// instance is shared across every cell in its PVTNUM region and flash
/// calls from different cells can run independently.
pub trait MixtureModel {
    fn kind(&self) -> MixtureKind;
    fn num_phase(&self) -> usize;
    fn num_component(&self) -> usize;

    /// `InitFlash` by saturations + a reference pore volume, used once at
    /// setup from equilibrium-table saturations.
    fn init_flash_by_saturation(
        &self,
        p: f64,
        t: f64,
        s: &[f64],
        pore_volume: f64,
        zi: &[f64],
        out: &mut FlashOutput,
    ) -> OcpResult<()>;

    /// `InitFlash`/`Flash` by component moles — the per-step call.
    fn flash_by_moles(&self, p: f64, t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()>;

    /// `FlashDeriv`: `flash_by_moles` plus `vfp`, `vfi`, and
    /// `d_sec_d_pri`, required for FIM's Jacobian.
    fn flash_deriv(&self, p: f64, t: f64, ni: &[f64], out: &mut FlashOutput) -> OcpResult<()>;

    /// Single-phase molar density [lbmol/rb] at `(P, T, zi)`, used by well
    /// injection terms.
    fn xi_phase(&self, p: f64, t: f64, zi: &[f64]) -> f64;

    /// Single-phase mass density [lbm/rb] at `(P, T, zi)`.
    fn rho_phase(&self, p: f64, t: f64, zi: &[f64]) -> f64;

    /// Oil specific weight [psi/ft] from the oil PVT curve at `p_in` with
    /// zero solution gas.
    fn gamma_phase_o(&self, p_in: f64) -> f64;
    fn gamma_phase_w(&self, p_in: f64) -> f64;
    fn gamma_phase_g(&self, p_in: f64) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_output_sizes_match_phase_and_component_counts() {
        let out = FlashOutput::sized(3, 3);
        assert_eq!(out.s.len(), 3);
        assert_eq!(out.xij.len(), 9);
        assert_eq!(out.max_len_d_sec_d_pri(), 16 * 3);
    }

    #[test]
    fn xij_indexing_is_phase_major() {
        let mut out = FlashOutput::sized(2, 2);
        out.set_xij(1, 0, 0.75);
        assert_eq!(out.xij_at(1, 0), 0.75);
        assert_eq!(out.xij[2], 0.75);
    }
}
