//! Rock compressibility: the pore-volume multiplier `Bulk::rock_pore_volume`
//! applies on top of `CellGeometry::static_pore_volume`.
//!
//! Keyed per ROCKNUM region,
//! this is the ROCK keyword's table reduced to
//! its two numbers: a reference pressure and a compressibility.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct RockProperties {
    /// Reference pressure at which `static_pore_volume` applies exactly [psia].
    pub p_ref: f64,
    /// Rock compressibility [1/psi].
    pub compressibility: f64,
}

impl RockProperties {
    pub fn default_rock() -> Self {
        Self {
            p_ref: 3500.0,
            compressibility: 3.0e-6,
        }
    }

    /// Pore-volume multiplier `1 + cr*(P - Pref)` and its derivative w.r.t.
    /// `P` (`cr`, a constant — kept as a method so callers don't
    /// special-case the rock model the way they would a PVT table).
    pub fn multiplier(&self, p: f64) -> f64 {
        1.0 + self.compressibility * (p - self.p_ref)
    }

    pub fn dmultiplier_dp(&self) -> f64 {
        self.compressibility
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_is_one_at_reference_pressure() {
        let rock = RockProperties::default_rock();
        assert!((rock.multiplier(rock.p_ref) - 1.0).abs() < 1e-12);
    }
}
