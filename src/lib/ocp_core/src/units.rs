//! Field-unit constants.
//!
//! Everything in this crate is in field units throughout: pressure in psia,
//! surface rates in STB/day (liquids) or MSCF/day (gas), temperature in °F,
//! distance in ft, time in day. Conversion factors used at transmissibility
//! and gravity-head call sites are centralized here, once, rather than
//! inlined and re-derived at each call site.

/// Converts density [lbm/ft3] * depth [ft] to a pressure term [psia],
/// folding in the gravitational constant. Standard oil-field value.
pub const GRAVITY_FACTOR: f64 = 0.00694444;

/// Converts reservoir-barrel volumes to cubic feet (1 bbl = 5.614583 ft3).
pub const CONV1: f64 = 5.614583;

/// Darcy transmissibility constant for field units: converts
/// mD·ft²/(ft·cP) to a flow coefficient in RB/day/psi (before dividing by
/// formation volume factor to get surface units), re-based to field units
/// (1 mD = 9.869233e-16 m², 1 ft = 0.3048 m, 1 psi = 6894.757 Pa,
/// 1 cP = 1e-3 Pa·s, 1 day = 86400 s) from the metric constant
/// `8.527e-5` for mD·m²/(m·cP) → m³/day/bar.
pub const TRANSMISSIBILITY_CONST: f64 = 0.001127;

/// Lower bound below which a scalar (saturation sum, pore-volume error,
/// component mole fraction) is treated as exactly its nominal value:
/// `Σj S[n,j] = 1` within this tolerance.
pub const TINY: f64 = 1.0e-10;

/// Mass in an empty/near-empty cell below which `Ni` magnitude is soft-reset
/// rather than treated as a hard invariant break, relative to total moles
/// `Nt`.
pub const NEGATIVE_NI_SOFT_RESET_FRACTION: f64 = 1.0e-3;
pub const NEGATIVE_NI_RESET_FRACTION: f64 = 1.0e-8;
