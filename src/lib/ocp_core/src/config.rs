//! `ReservoirConfig`: the in-memory result a deck parser would produce.
//!
//! Input-deck lexing/parsing (the keyword-oriented text format:
//! `DIMENS`, `EQUIL`, `PBVD`, `ZMFVD`, `TEMPVD`, `PVDG`, `PVTW`, `PVTO`,
//! `SWOF`/`SGOF`/`SOF3`, `ROCK`, `SWATINIT`, `WELSPECS`, `COMPDAT`,
//! `WCONINJE`, `WCONPROD`, `WELTARG`, `TSTEP`, `TUNING`, `METHOD`,
//! `SUMMARY`, `RPTSCHED`) is a named out-of-scope collaborator; this is the
//! seam it plugs into. A host builds one of these directly, or a deck
//! parser built against this crate builds it from keyword text.

use crate::bulk::EquilRegion;
use crate::capillary::CapillaryPressure;
use crate::control::CriticalTimeParams;
use crate::grid::Grid;
use crate::mixture::MixtureModel;
use crate::relperm::FlowUnit;
use crate::rock::RockProperties;
use crate::well::Well;

/// `METHOD` keyword values: `IMPEC` or `FIM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Impec,
    Fim,
}

/// One `EQUIL`/`PBVD`/`ZMFVD` region: the set of active-cell indices it
/// governs plus the depth-pressure reference data.
pub struct EquilRegionConfig {
    pub cells: Vec<usize>,
    pub equil: EquilRegion,
}

pub struct ReservoirConfig {
    pub grid: Grid,
    pub num_phase: usize,
    pub num_component: usize,
    pub models: Vec<Box<dyn MixtureModel>>,
    pub scal: Vec<FlowUnit>,
    pub pc: Vec<CapillaryPressure>,
    pub rock: Vec<RockProperties>,
    pub equil_regions: Vec<EquilRegionConfig>,
    pub wells: Vec<Well>,
    pub method: Method,
    pub control_schedule: Vec<CriticalTimeParams>,
}

impl ReservoirConfig {
    pub fn new(
        grid: Grid,
        num_phase: usize,
        num_component: usize,
        models: Vec<Box<dyn MixtureModel>>,
        scal: Vec<FlowUnit>,
        pc: Vec<CapillaryPressure>,
        rock: Vec<RockProperties>,
        method: Method,
        control_schedule: Vec<CriticalTimeParams>,
    ) -> Self {
        ReservoirConfig {
            grid,
            num_phase,
            num_component,
            models,
            scal,
            pc,
            rock,
            equil_regions: Vec::new(),
            wells: Vec::new(),
            method,
            control_schedule,
        }
    }

    pub fn with_equil_region(mut self, cells: Vec<usize>, equil: EquilRegion) -> Self {
        self.equil_regions.push(EquilRegionConfig { cells, equil });
        self
    }

    pub fn with_well(mut self, well: Well) -> Self {
        self.wells.push(well);
        self
    }
}
