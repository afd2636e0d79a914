//! Cross-cutting invariants and the remaining seed scenarios that operate
//! directly on `Bulk`/`MixtureModel` rather than a full `Reservoir`:
//! compositional phase disappearance and volume-balance bounding.

use ocp_core::bulk::{Bulk, EquilRegion};
use ocp_core::capillary::CapillaryPressure;
use ocp_core::config::{Method, ReservoirConfig};
use ocp_core::control::{CriticalTimeParams, NrParams, PredictParams, TimeParams};
use ocp_core::error::Severity;
use ocp_core::grid::{CellGeometry, Grid};
use ocp_core::mixture::accelerator::FlashType;
use ocp_core::mixture::compositional::{CompositionalEos, HydrocarbonComponent};
use ocp_core::mixture::black_oil::BlackOilModel;
use ocp_core::mixture::MixtureModel;
use ocp_core::pvt::PvtTable;
use ocp_core::relperm::FlowUnit;
use ocp_core::reservoir::Reservoir;
use ocp_core::rock::RockProperties;
use ocp_core::units::TINY;
use ocp_core::well::{Perforation, Well, WellRole};

fn one_cell_grid() -> Grid {
    Grid::uniform(
        1,
        1,
        1,
        CellGeometry {
            dx: 300.0,
            dy: 300.0,
            dz: 50.0,
            ntg: 1.0,
            porosity: 0.2,
            perm_x: 200.0,
            perm_y: 200.0,
            perm_z: 20.0,
            depth: 8000.0,
            satnum: 0,
            pvtnum: 0,
            rocknum: 0,
            active: true,
        },
    )
}

fn methane_propane_with_water() -> CompositionalEos {
    let c1 = HydrocarbonComponent { name: "C1", tc: 343.0, pc: 667.0, omega: 0.0115, mw: 16.04 };
    let c3 = HydrocarbonComponent { name: "C3", tc: 666.0, pc: 617.0, omega: 0.1523, mw: 44.1 };
    CompositionalEos::new(vec![c1, c3], vec![0.0, 0.0, 0.0, 0.0], 350.0, 62.4, 1.0, 3000.0, 3.0e-6, 0.5)
}

fn oil_water_bulk() -> Bulk {
    let grid = one_cell_grid();
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
    Bulk::setup(
        &grid,
        2,
        2,
        vec![model],
        vec![FlowUnit::default_scal()],
        vec![CapillaryPressure::default_pc()],
        vec![RockProperties::default_rock()],
    )
    .expect("valid bulk setup")
}

/// A one-cell `LiveOilDryGasWater` bulk whose dissolved-gas capacity sits
/// exactly at `Rs * No` for constant PVT tables, so a caller can place `Ni`
/// precisely at (`capacity - ng_total == 0`) or arbitrarily far from it.
fn live_oil_bulk() -> Bulk {
    let grid = one_cell_grid();
    let model: Box<dyn MixtureModel> = Box::new(BlackOilModel::live_oil_dry_gas_water(
        PvtTable::constant(1.2),
        PvtTable::constant(2.0),
        PvtTable::constant(0.8),
        PvtTable::constant(1.0),
        PvtTable::constant(0.02),
        1.0,
        3000.0,
        3.0e-6,
        0.5,
        1.0,
        1.0,
        350.3,
        53.0,
        0.06,
        62.4,
    ));
    Bulk::setup(
        &grid,
        3,
        3,
        vec![model],
        vec![FlowUnit::default_scal()],
        vec![CapillaryPressure::default_pc()],
        vec![RockProperties::default_rock()],
    )
    .expect("valid bulk setup")
}

/// At the bubble point (`ng_total == Rs * No`) `flash_deriv` reports a
/// `stability_margin` of exactly zero, which is always within the
/// accelerator's trust radius once it becomes the cached reference — so a
/// second flash at the same `(P, T, zi)` must be classified `SkipAll`.
/// Moving composition far from the bubble point (free gas breaks out) must
/// invalidate that reference, and `commit`/`restore` across the transient
/// must bring it back.
#[test]
fn flash_type_reaches_skip_all_and_round_trips_across_phase_disappearance() {
    let mut bulk = live_oil_bulk();
    bulk.set_pressure(0, 3000.0);
    bulk.ni_row_mut(0).copy_from_slice(&[100.0, 80.0, 500.0]);
    bulk.update_rock_pore_volume_all().expect("positive pore volume at reference pressure");

    assert_eq!(bulk.cal_flash_type(0, false, 0.0, 0.0), FlashType::Full, "no reference established yet");

    bulk.flash_all(false).expect("flash at the bubble point");
    assert_eq!(
        bulk.flash_out(0).stability_margin,
        Some(0.0),
        "ng_total was chosen to sit exactly at Rs * No"
    );
    assert_eq!(
        bulk.cal_flash_type(0, false, 0.0, 0.0),
        FlashType::SkipAll,
        "repeating the same (P, T, zi) should reuse the cached reference"
    );
    bulk.commit();

    // Drive the cell well past the bubble point: most of the gas breaks
    // out of solution, a second hydrocarbon phase disappears from "all
    // dissolved" to "mostly free", moving zi far from the cached reference.
    bulk.ni_row_mut(0).copy_from_slice(&[100.0, 400.0, 500.0]);
    bulk.flash_all(false).expect("flash past the bubble point");
    assert!(bulk.flash_out(0).phase_exist[1], "free gas should now be present");
    assert_eq!(
        bulk.cal_flash_type(0, false, 0.0, 0.0),
        FlashType::Full,
        "composition moved far outside the cached trust region"
    );

    bulk.restore();
    assert_eq!(bulk.ni_row(0)[1], 80.0, "restore must undo the phase-disappearance transient");
    assert_eq!(
        bulk.cal_flash_type(0, false, 0.0, 0.0),
        FlashType::SkipAll,
        "restore must bring back the bubble-point accelerator reference along with Ni/P"
    );
}

/// A two-cell IMPES reservoir whose producer draws the system down hard
/// enough, over a large initial `dt`, that the post-update volume-balance
/// residual exceeds `Verrmax` on the first attempt: `Reservoir::step` must
/// halve `dt` through its internal retry loop until the residual clears the
/// bound, commit, and never let `dt` fall below `timeMin` while doing so.
#[test]
fn reservoir_step_retries_a_bad_volume_balance_state_within_bounded_halvings() {
    let cell = |depth: f64| CellGeometry {
        dx: 300.0,
        dy: 300.0,
        dz: 40.0,
        ntg: 1.0,
        porosity: 0.2,
        perm_x: 150.0,
        perm_y: 150.0,
        perm_z: 15.0,
        depth,
        satnum: 0,
        pvtnum: 0,
        rocknum: 0,
        active: true,
    };
    let grid = Grid::uniform(2, 1, 1, cell(8000.0));

    // A steeply pressure-dependent Bo: a modest pressure swing over a large
    // dt moves the flashed oil-phase volume far out of step with the
    // nearly-incompressible rock pore volume, so the volume-balance
    // residual is large exactly when dt is large and shrinks as dt halves.
    let model: Box<dyn MixtureModel> = Box::new(BlackOilModel::oil_water(
        PvtTable::new(vec![(1000.0, 1.0), (2000.0, 1.6), (3000.0, 2.6), (4000.0, 4.4), (5000.0, 7.8)]),
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
        vec![CriticalTimeParams {
            critical_time_index: 0,
            time: TimeParams {
                time_init: 180.0,
                time_max: 3650.0,
                time_min: 0.05,
                max_incre_fac: 2.0,
                min_chop_fac: 0.5,
                cut_fac_nr: 0.5,
            },
            predict: PredictParams::default(),
            nr: NrParams::default(),
        }],
    )
    .with_equil_region(
        vec![0, 1],
        EquilRegion { datum_depth: 8000.0, datum_pressure: 4000.0, woc_depth: Some(8200.0), goc_depth: None },
    );

    let mut reservoir = Reservoir::build(config).expect("valid two-cell oil-water reservoir");
    let mut producer = Well::new("P1", "G1", 1, 0, 8000.0, WellRole::Producer, 2000.0, 500.0, 6000.0);
    producer.add_perforation(Perforation::new(1, 8000.0, 3.0));
    reservoir.wells_mut().push(producer);

    let outcome = reservoir.step().expect("step must eventually commit, not abort");
    assert!(matches!(outcome, ocp_core::method::StepOutcome::Committed));

    let retries = reservoir.diagnostics().count_at_least(Severity::Retry);
    assert!(retries >= 1, "a 180-day step at this drawdown should need at least one halve-dt retry");
    assert!(retries <= 3, "the retry loop must terminate within 3 halvings, got {retries}");

    let time_min = 0.05;
    assert!(reservoir.dt() >= time_min, "dt {} fell below timeMin {} during the retry loop", reservoir.dt(), time_min);
}

/// Mole-weighted feeds that are nearly pure hydrocarbon, moving toward
/// nearly pure water, should carry phase-existence from hydrocarbon
/// two-phase down to a single aqueous phase as the liquid hydrocarbon
/// vanishes, i.e. phase disappearance rather than a crash or NaN.
#[test]
fn compositional_flash_survives_liquid_phase_disappearance() {
    use ocp_core::mixture::FlashOutput;

    let model = methane_propane_with_water();
    let mut out = FlashOutput::sized(3, 3);

    model.flash_by_moles(2000.0, 600.0, &[30.0, 70.0, 0.0], &mut out).expect("hydrocarbon-only flash");
    let hydrocarbon_total: f64 = out.nj[0] + out.nj[1];
    assert!(hydrocarbon_total > 0.0);

    model.flash_by_moles(2000.0, 600.0, &[1.0e-6, 1.0e-6, 100.0], &mut out).expect("water-dominated flash");
    let total: f64 = out.nj.iter().sum();
    assert!((total - (100.0 + 2.0e-6)).abs() < 1.0e-6, "moles must still balance once hydrocarbon vanishes");
    assert!(
        out.phase_exist.iter().filter(|p| **p).count() >= 1,
        "at least the aqueous phase must remain present"
    );
}

/// A cell's relative volume-balance residual must fall within `check_ve`'s
/// tolerance once pressure and moles are at their reference (no-forcing)
/// state, and `max_ve_residual` must report the same bound consistently.
#[test]
fn volume_balance_residual_is_bounded_at_reference_state() {
    let mut bulk = oil_water_bulk();
    bulk.set_pressure(0, 3000.0);
    bulk.ni_row_mut(0)[0] = 500.0;
    bulk.ni_row_mut(0)[1] = 500.0;
    bulk.update_rock_pore_volume(0).expect("positive pore volume at reference pressure");
    bulk.flash_all(false).expect("flash should succeed at a benign state");

    assert!(bulk.check_ve(1.0e-2), "volume residual {} exceeds a generous 1% bound", bulk.max_ve_residual());
}

/// `check_p`/`check_ni` must distinguish a healthy cell from one with a
/// non-positive pressure or a deeply negative mole count, matching the
/// small-return-code style used by the retry loop instead of panicking.
#[test]
fn check_p_and_check_ni_flag_unhealthy_cells_without_panicking() {
    use ocp_core::bulk::CheckNiOutcome;

    let mut bulk = oil_water_bulk();
    bulk.set_pressure(0, 3000.0);
    bulk.ni_row_mut(0)[0] = 500.0;
    bulk.ni_row_mut(0)[1] = 500.0;
    assert!(bulk.check_p());
    assert_eq!(bulk.check_ni(), CheckNiOutcome::Ok);

    bulk.set_pressure(0, -1.0);
    assert!(!bulk.check_p());

    bulk.ni_row_mut(0)[0] = -1.0e3;
    assert_eq!(bulk.check_ni(), CheckNiOutcome::Retry);
}

/// `commit`/`restore` must round-trip a cell's full state bit-identically:
/// restoring after a speculative mutation must undo it exactly, the same
/// guarantee a halved-dt retry depends on.
#[test]
fn commit_and_restore_round_trip_cell_state() {
    let mut bulk = oil_water_bulk();
    bulk.set_pressure(0, 3000.0);
    bulk.ni_row_mut(0)[0] = 500.0;
    bulk.ni_row_mut(0)[1] = 500.0;
    bulk.commit();

    bulk.set_pressure(0, 1234.0);
    bulk.ni_row_mut(0)[0] = 1.0;
    bulk.restore();

    assert_eq!(bulk.pressure(0), 3000.0);
    assert_eq!(bulk.ni_row(0)[0], 500.0);
    assert_eq!(bulk.ni_row(0)[1], 500.0);
}

/// `init_sj_pc` over an oil-water equilibrium region must leave every
/// saturation nonnegative and summing to one within `TINY`.
#[test]
fn equilibrium_initialization_produces_physical_saturations() {
    let mut bulk = oil_water_bulk();
    bulk.init_sj_pc(
        &[0],
        &EquilRegion { datum_depth: 8000.0, datum_pressure: 4000.0, woc_depth: Some(8200.0), goc_depth: None },
    )
    .expect("equilibrium init should succeed for a one-cell oil-water region");

    let s = &bulk.flash_out(0).s;
    assert!(s.iter().all(|&sj| sj >= -TINY), "saturations must not be meaningfully negative: {s:?}");
    let sum: f64 = s.iter().sum();
    assert!((sum - 1.0).abs() < 1.0e-6, "saturations must sum to one, got {sum}");
    assert!(bulk.pressure(0) > 0.0);
}
