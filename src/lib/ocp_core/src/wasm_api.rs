//! Thin `wasm-bindgen` facade over `Reservoir`: a browser-facing
//! `ReservoirSimulator` with a constructor sized by grid dimensions,
//! `add_well`, `step`, and JSON-serialized state getters. Internally this
//! drives the full `Bulk`/`Connections`/`Well` engine; only the JS-facing
//! surface is kept narrow.

use wasm_bindgen::prelude::*;

use crate::bulk::EquilRegion;
use crate::capillary::CapillaryPressure;
use crate::config::{Method, ReservoirConfig};
use crate::control::{Control, CriticalTimeParams, NrParams, PredictParams, TimeParams};
use crate::grid::{CellGeometry, Grid};
use crate::mixture::black_oil::BlackOilModel;
use crate::mixture::MixtureModel;
use crate::pvt::PvtTable;
use crate::relperm::FlowUnit;
use crate::reservoir::Reservoir;
use crate::rock::RockProperties;
use crate::well::{Perforation, Well, WellRole};

#[wasm_bindgen(start)]
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn default_schedule() -> Vec<CriticalTimeParams> {
    vec![CriticalTimeParams {
        critical_time_index: 0,
        time: TimeParams::default(),
        predict: PredictParams::default(),
        nr: NrParams::default(),
    }]
}

/// A uniform oil-water reservoir, the facade's one supported fluid system
/// (the full crate supports more via `Reservoir::build` directly; the
/// `wasm` surface stays narrow to keep the JS-facing API small).
#[wasm_bindgen]
pub struct ReservoirSimulator {
    reservoir: Reservoir,
    nx: usize,
    ny: usize,
    nz: usize,
}

#[wasm_bindgen]
impl ReservoirSimulator {
    #[wasm_bindgen(constructor)]
    pub fn new(nx: usize, ny: usize, nz: usize) -> ReservoirSimulator {
        let cell = CellGeometry {
            dx: 100.0,
            dy: 100.0,
            dz: 20.0,
            ntg: 1.0,
            porosity: 0.2,
            perm_x: 100.0,
            perm_y: 100.0,
            perm_z: 10.0,
            depth: 8000.0,
            satnum: 0,
            pvtnum: 0,
            rocknum: 0,
            active: true,
        };
        let grid = Grid::uniform(nx, ny, nz, cell);

        let model: Box<dyn MixtureModel> = Box::new(BlackOilModel::oil_water(
            PvtTable::new(vec![(1000.0, 1.3), (5000.0, 1.2)]),
            PvtTable::new(vec![(1000.0, 1.5), (5000.0, 0.8)]),
            1.0,
            3000.0,
            3.0e-6,
            0.5,
            350.0,
            350.3,
            53.0,
            62.4,
        ));

        let config = ReservoirConfig::new(
            grid,
            2,
            2,
            vec![model],
            vec![FlowUnit::default_scal()],
            vec![CapillaryPressure::default_pc()],
            vec![RockProperties::default_rock()],
            Method::Impec,
            default_schedule(),
        )
        .with_equil_region(
            (0..nx * ny * nz).collect(),
            EquilRegion { datum_depth: 8000.0, datum_pressure: 3000.0, woc_depth: Some(8100.0), goc_depth: None },
        );

        let reservoir = Reservoir::build(config).expect("default oil-water reservoir configuration is always valid");
        ReservoirSimulator { reservoir, nx, ny, nz }
    }

    fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.nx * self.ny + j * self.nx + i
    }

    /// Adds a simple single-perforation well at `(i, j, k)` with a fixed
    /// BHP target and productivity index.
    #[wasm_bindgen(js_name = addWell)]
    pub fn add_well(&mut self, i: usize, j: usize, k: usize, bhp: f64, pi: f64, injector: bool) -> Result<(), String> {
        if i >= self.nx || j >= self.ny || k >= self.nz {
            return Err(format!("well index ({i},{j},{k}) out of bounds ({},{},{})", self.nx, self.ny, self.nz));
        }
        if !bhp.is_finite() || !pi.is_finite() || pi < 0.0 {
            return Err("bhp and pi must be finite, and pi must be non-negative".to_string());
        }
        let role = if injector { WellRole::Injector } else { WellRole::Producer };
        let mut well = Well::new(format!("W{i}_{j}_{k}"), "FIELD", i, j, 8000.0, role, bhp, 0.0, 10000.0);
        if injector {
            well.injection_zi = vec![0.0, 1.0];
        }
        well.add_perforation(Perforation::new(self.cell_index(i, j, k), 8000.0, pi));
        self.reservoir.wells_mut().push(well);
        Ok(())
    }

    pub fn step(&mut self, delta_t_days: f64) -> Result<(), String> {
        self.reservoir.set_dt(delta_t_days.max(1.0e-6));
        self.reservoir.step().map(|_| ()).map_err(|e| e.to_string())
    }

    #[wasm_bindgen(js_name = getTime)]
    pub fn get_time(&self) -> f64 {
        self.reservoir.current_time()
    }

    #[wasm_bindgen(js_name = getGridState)]
    pub fn get_grid_state(&self) -> JsValue {
        let bulk = self.reservoir.bulk();
        let rows: Vec<_> = (0..bulk.num_cells())
            .map(|n| {
                let flash = bulk.flash_out(n);
                (bulk.pressure(n), flash.s.clone())
            })
            .collect();
        serde_wasm_bindgen::to_value(&rows).unwrap_or(JsValue::NULL)
    }

    #[wasm_bindgen(js_name = getDimensions)]
    pub fn get_dimensions(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&[self.nx, self.ny, self.nz]).unwrap_or(JsValue::NULL)
    }
}
