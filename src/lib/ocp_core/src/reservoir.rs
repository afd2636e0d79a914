//! `Reservoir`: the top-level owner tying `Grid`, `Bulk`, `Connections`,
//! and `Well`s together behind the single-threaded step loop described by
//! the concurrency/resource model (ordering is strictly well prep -> flash
//! -> relperm/Pc -> connection assembly -> solve -> update -> checks; no
//! suspension points, a fatal abort exits the whole run).

use crate::bulk::Bulk;
use crate::config::{Method, ReservoirConfig};
use crate::connection::Connections;
use crate::control::Control;
use crate::error::OcpResult;
use crate::method::fim::FimDriver;
use crate::method::impes::ImpesDriver;
use crate::method::StepOutcome;
use crate::well::{field_totals, Well};

enum Driver {
    Impes(ImpesDriver),
    Fim(FimDriver),
}

pub struct Reservoir {
    bulk: Bulk,
    connections: Connections,
    wells: Vec<Well>,
    control: Control,
    driver: Driver,
}

impl Reservoir {
    pub fn build(config: ReservoirConfig) -> OcpResult<Reservoir> {
        let connections = Connections::build(&config.grid);
        let mut bulk = Bulk::setup(&config.grid, config.num_phase, config.num_component, config.models, config.scal, config.pc, config.rock)?;

        for region in &config.equil_regions {
            bulk.init_sj_pc(&region.cells, &region.equil)?;
        }
        bulk.update_rock_pore_volume_all()?;
        bulk.flash_all(matches!(config.method, Method::Fim))?;

        let driver = match config.method {
            Method::Impec => Driver::Impes(ImpesDriver::default()),
            Method::Fim => Driver::Fim(FimDriver::default()),
        };

        Ok(Reservoir {
            bulk,
            connections,
            wells: config.wells,
            control: Control::new(config.control_schedule),
            driver,
        })
    }

    pub fn current_time(&self) -> f64 {
        self.control.current_time
    }

    pub fn dt(&self) -> f64 {
        self.control.dt
    }

    pub fn total_steps(&self) -> usize {
        self.control.total_steps
    }

    pub fn bulk(&self) -> &Bulk {
        &self.bulk
    }

    pub fn wells(&self) -> &[Well] {
        &self.wells
    }

    pub fn wells_mut(&mut self) -> &mut Vec<Well> {
        &mut self.wells
    }

    /// Overrides the next step's `dt` directly (used by hosts driving the
    /// engine at a fixed cadence, e.g. the `wasm` facade's `step(delta_t)`).
    pub fn set_dt(&mut self, dt: f64) {
        self.control.dt = dt;
    }

    pub fn diagnostics(&self) -> &crate::error::Diagnostics {
        &self.control.diagnostics
    }

    /// Advances one time step. Applies each well's mode schedule for the
    /// current critical-time index before stepping, so runtime retargeting
    /// (`WELTARG`-style) takes effect at the right point in the run.
    pub fn step(&mut self) -> OcpResult<StepOutcome> {
        let critical_index = self.control.total_steps;
        self.control.apply_schedule(critical_index);
        for well in &mut self.wells {
            well.apply_schedule(critical_index);
        }

        let outcome = match &self.driver {
            Driver::Impes(driver) => driver.step(&mut self.bulk, &self.connections, &mut self.wells, &mut self.control),
            Driver::Fim(driver) => driver.step(&mut self.bulk, &self.connections, &mut self.wells, &mut self.control),
        };

        if let StepOutcome::Fatal(cause) = outcome {
            return Err(cause);
        }
        Ok(outcome)
    }

    /// Runs steps until `Control::is_finished` or a fatal abort.
    pub fn run_to_completion(&mut self) -> OcpResult<()> {
        while !self.control.is_finished() {
            self.step()?;
        }
        Ok(())
    }

    /// Field-level production/injection totals across every well, for
    /// summary output (`FOPR`/`FWIR`/... style aggregation).
    pub fn field_totals(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        field_totals(&self.wells, self.bulk.num_component())
    }
}
