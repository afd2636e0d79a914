//! `PvtTable`: a minimal monotone piecewise-linear interpolation primitive.
//!
//! PVT/SAT table *storage* and a production-grade interpolation engine (with
//! hysteresis, extrapolation policy, etc.) are a named external collaborator
//!; this is the seam's concrete, minimal stand-in — the same role
//! `relperm::FlowUnit`/`capillary::CapillaryPressure` play for SAT tables,
//! just for PVDO/PVDG/PVTW/PVTO-style `value(independent variable)` curves
//!. Every `MixtureModel` variant is built from
//! one or more of these rather than from hard-coded polynomials, so a host
//! that owns a real table-reading/parsing layer can hand in its own points.

use serde::{Deserialize, Serialize};

/// A monotone (in the independent variable) table of `(x, value)` points,
/// linearly interpolated, with flat extrapolation beyond the endpoints —
/// the conventional behaviour of `PVDO`/`PVDG`/`PVTW`-style keyword tables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PvtTable {
    points: Vec<(f64, f64)>,
}

impl PvtTable {
    /// Builds the table from points sorted ascending by `x`; panics on an
    /// empty table (malformed input the parsing collaborator should have
    /// rejected before this layer ever sees it).
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        assert!(!points.is_empty(), "PVT table must have at least one point");
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("non-NaN table abscissa"));
        PvtTable { points }
    }

    pub fn constant(value: f64) -> Self {
        PvtTable {
            points: vec![(0.0, value), (1.0e9, value)],
        }
    }

    /// `(value, d(value)/dx)` at `x`, flat-extrapolated beyond the ends.
    pub fn value_and_slope(&self, x: f64) -> (f64, f64) {
        let pts = &self.points;
        if pts.len() == 1 || x <= pts[0].0 {
            return (pts[0].1, 0.0);
        }
        if x >= pts[pts.len() - 1].0 {
            return (pts[pts.len() - 1].1, 0.0);
        }
        let seg = pts.windows(2).find(|w| x >= w[0].0 && x <= w[1].0).unwrap();
        let (x0, y0) = seg[0];
        let (x1, y1) = seg[1];
        let slope = (y1 - y0) / (x1 - x0);
        (y0 + slope * (x - x0), slope)
    }

    pub fn value(&self, x: f64) -> f64 {
        self.value_and_slope(x).0
    }

    /// Inverts the table (assumes `value` is monotone in `x`, true for all
    /// PVT curves used here — Bo/Bg/mu decreasing or increasing
    /// monotonically with P, Rs increasing with P below bubble point).
    pub fn invert(&self, value: f64) -> f64 {
        let pts = &self.points;
        if pts.len() == 1 {
            return pts[0].0;
        }
        let increasing = pts.last().unwrap().1 >= pts[0].1;
        if increasing {
            if value <= pts[0].1 {
                return pts[0].0;
            }
            if value >= pts[pts.len() - 1].1 {
                return pts[pts.len() - 1].0;
            }
        } else {
            if value >= pts[0].1 {
                return pts[0].0;
            }
            if value <= pts[pts.len() - 1].1 {
                return pts[pts.len() - 1].0;
            }
        }
        let seg = pts
            .windows(2)
            .find(|w| {
                let lo = w[0].1.min(w[1].1);
                let hi = w[0].1.max(w[1].1);
                value >= lo && value <= hi
            })
            .unwrap();
        let (x0, y0) = seg[0];
        let (x1, y1) = seg[1];
        if (y1 - y0).abs() < f64::EPSILON {
            return x0;
        }
        x0 + (x1 - x0) * (value - y0) / (y1 - y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_linearly_between_points() {
        let t = PvtTable::new(vec![(1000.0, 1.0), (3000.0, 1.2), (5000.0, 1.1)]);
        let (v, slope) = t.value_and_slope(2000.0);
        assert!((v - 1.1).abs() < 1e-12);
        assert!((slope - (0.2 / 2000.0)).abs() < 1e-12);
    }

    #[test]
    fn flat_extrapolates_beyond_range() {
        let t = PvtTable::new(vec![(1000.0, 1.0), (3000.0, 1.2)]);
        assert_eq!(t.value(0.0), 1.0);
        assert_eq!(t.value(10000.0), 1.2);
    }

    #[test]
    fn invert_recovers_abscissa() {
        let t = PvtTable::new(vec![(1000.0, 1.0), (3000.0, 1.2), (5000.0, 1.1)]);
        let x = t.invert(1.1);
        assert!((x - 2000.0).abs() < 1e-9 || (x - 4000.0).abs() < 1e-9);
    }
}
