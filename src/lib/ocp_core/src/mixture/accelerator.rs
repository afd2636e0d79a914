//! Skip-stability-analysis bookkeeping.
//!
//! This cache runs parallel to the primary flash state and must be
//! snapshot/restored in lockstep with it; it is keyed by cell and is never
//! treated as authoritative truth about phase behavior, only a trust
//! region for skipping redundant stability analysis. It lives next to
//! `Bulk`'s per-cell state (one `FlashTypeTracker` per cell) rather than
//! inside a `MixtureModel`, since the model instances are shared across
//! cells in a PVTNUM region but this trust region is per-cell.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashType {
    /// Skip the entire stability/phase-split test; reuse last result.
    SkipAll,
    /// Skip stability analysis but still run the phase split (FIM only).
    SkipStabilityOnly,
    /// Full stability analysis + phase split.
    Full,
}

/// Per-cell trust-region cache. `minEigenSkip`/`ziSkip`/`PSkip`/`TSkip` in
/// the original naming.
#[derive(Debug, Clone)]
pub struct FlashTypeTracker {
    min_eigen_ref: Option<f64>,
    composition_ref: Vec<f64>,
    p_ref: f64,
    t_ref: f64,
    /// Phase count at the end of the previous successful flash — used by
    /// the FIM-only `SkipStabilityOnly` predicate, which requires at least
    /// three phases present last step.
    last_num_phase_present: usize,
    eigen_trust_radius: f64,
    composition_trust_radius: f64,
    p_trust_radius: f64,
    t_trust_radius: f64,
}

impl FlashTypeTracker {
    pub fn new(num_component: usize) -> Self {
        FlashTypeTracker {
            min_eigen_ref: None,
            composition_ref: vec![0.0; num_component],
            p_ref: 0.0,
            t_ref: 0.0,
            last_num_phase_present: 0,
            eigen_trust_radius: 1.0e-3,
            composition_trust_radius: 1.0e-3,
            p_trust_radius: 5.0,
            t_trust_radius: 2.0,
        }
    }

    /// Decide the flash type for this cell.
    ///
    /// `in_fim`: true when called from the FIM driver (only FIM is allowed
    /// to return `SkipStabilityOnly`).
    /// `ds_nr` / `ds_nrp`: the Newton saturation-change estimates
    /// (`dSNR` + `dSNRP`) from the last iteration; `SkipStabilityOnly`
    /// requires `|dSNR + dSNRP| >= 1e-4` ("no imminent phase change").
    pub fn classify(&self, p: f64, t: f64, zi: &[f64], in_fim: bool, ds_nr: f64, ds_nrp: f64) -> FlashType {
        if let Some(eigen_ref) = self.min_eigen_ref {
            let within_p = (p - self.p_ref).abs() <= self.p_trust_radius;
            let within_t = (t - self.t_ref).abs() <= self.t_trust_radius;
            let within_zi = zi
                .iter()
                .zip(self.composition_ref.iter())
                .all(|(a, b)| (a - b).abs() <= self.composition_trust_radius);
            let within_eigen = eigen_ref.abs() <= self.eigen_trust_radius;

            if within_p && within_t && within_zi && within_eigen {
                return FlashType::SkipAll;
            }
        }

        if in_fim && self.last_num_phase_present >= 3 && (ds_nr + ds_nrp).abs() >= 1.0e-4 {
            return FlashType::SkipStabilityOnly;
        }

        FlashType::Full
    }

    /// Updates the trust reference from a freshly computed flash result.
    /// Call only after a *successful* flash.
    pub fn update(&mut self, p: f64, t: f64, zi: &[f64], min_eigenvalue: Option<f64>, num_phase_present: usize) {
        self.p_ref = p;
        self.t_ref = t;
        self.composition_ref.copy_from_slice(zi);
        self.min_eigen_ref = min_eigenvalue;
        self.last_num_phase_present = num_phase_present;
    }

    /// Snapshot for commit/restore lockstep with the primary state.
    pub fn snapshot(&self) -> FlashTypeTracker {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: &FlashTypeTracker) {
        *self = snapshot.clone();
    }
}
