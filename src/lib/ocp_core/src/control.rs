//! `Control`: time-stepping and Newton-iteration policy, keyed by
//! critical-time index so a schedule can change tuning mid-run the same
//! way a well's operating mode can (`well::Well::opt_schedule`).
//!
//! Owns the `Diagnostics` collaborator and the per-step solver bookkeeping
//! (linear-solver iteration count, wall time) that the method drivers
//! report back into after every assemble-and-solve.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Diagnostics;
use crate::linear_system::SolveReport;

/// `{timeInit, timeMax, timeMin, maxIncreFac, minChopFac, cutFacNR}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeParams {
    pub time_init: f64,
    pub time_max: f64,
    pub time_min: f64,
    pub max_incre_fac: f64,
    pub min_chop_fac: f64,
    pub cut_fac_nr: f64,
}

impl Default for TimeParams {
    fn default() -> Self {
        TimeParams {
            time_init: 1.0,
            time_max: 365.0,
            time_min: 1.0e-3,
            max_incre_fac: 2.0,
            min_chop_fac: 0.5,
            cut_fac_nr: 0.5,
        }
    }
}

/// `{dPlim, dSlim, dNlim, dVlim}` — per-step change limits the predictive
/// `dt'` formula chases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictParams {
    pub d_p_lim: f64,
    pub d_s_lim: f64,
    pub d_n_lim: f64,
    pub d_v_lim: f64,
}

impl Default for PredictParams {
    fn default() -> Self {
        PredictParams {
            d_p_lim: 200.0,
            d_s_lim: 0.1,
            d_n_lim: 0.1,
            d_v_lim: 0.01,
        }
    }
}

/// `{maxNRiter, NRtol, NRdPmax, NRdSmax, NRdPmin, NRdSmin, Verrmax}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NrParams {
    pub max_nr_iter: usize,
    pub nr_tol: f64,
    pub nr_dp_max: f64,
    pub nr_ds_max: f64,
    pub nr_dp_min: f64,
    pub nr_ds_min: f64,
    pub verr_max: f64,
}

impl Default for NrParams {
    fn default() -> Self {
        NrParams {
            max_nr_iter: 10,
            nr_tol: 1.0e-3,
            nr_dp_max: 1000.0,
            nr_ds_max: 1.0,
            nr_dp_min: 1.0,
            nr_ds_min: 1.0e-3,
            verr_max: 0.01,
        }
    }
}

/// A (TIME, PREDICT, NR) triple keyed by the critical-time index at which
/// it takes effect, the same indexing convention `Well::opt_schedule` uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CriticalTimeParams {
    pub critical_time_index: usize,
    pub time: TimeParams,
    pub predict: PredictParams,
    pub nr: NrParams,
}

/// Per-step diagnostics the method drivers fold in after each assemble-
/// solve-update cycle: how many Newton iterations this step took, how many
/// linear-solver iterations accumulated across them, and how long the
/// linear solves took in wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStats {
    pub nr_iterations: usize,
    pub linear_iterations: usize,
    pub linear_solver_time: Duration,
}

pub struct Control {
    schedule: Vec<CriticalTimeParams>,
    active_index: usize,

    pub current_time: f64,
    pub dt: f64,
    pub last_dt: f64,
    pub total_steps: usize,
    pub cumulative_nr_iterations: usize,
    pub cumulative_linear_iterations: usize,
    pub cumulative_linear_solver_time: Duration,

    pub diagnostics: Diagnostics,
}

impl Control {
    pub fn new(schedule: Vec<CriticalTimeParams>) -> Self {
        let dt = schedule.first().map(|p| p.time.time_init).unwrap_or(1.0);
        Control {
            schedule,
            active_index: 0,
            current_time: 0.0,
            dt,
            last_dt: dt,
            total_steps: 0,
            cumulative_nr_iterations: 0,
            cumulative_linear_iterations: 0,
            cumulative_linear_solver_time: Duration::ZERO,
            diagnostics: Diagnostics::new(),
        }
    }

    fn active(&self) -> &CriticalTimeParams {
        &self.schedule[self.active_index]
    }

    pub fn time_params(&self) -> TimeParams {
        self.active().time
    }

    pub fn predict_params(&self) -> PredictParams {
        self.active().predict
    }

    pub fn nr_params(&self) -> NrParams {
        self.active().nr
    }

    /// Advances the active schedule entry to the latest one at or before
    /// `critical_time_index`, mirroring `Well::apply_schedule`.
    pub fn apply_schedule(&mut self, critical_time_index: usize) {
        if let Some((idx, _)) = self
            .schedule
            .iter()
            .enumerate()
            .filter(|(_, p)| p.critical_time_index <= critical_time_index)
            .max_by_key(|(_, p)| p.critical_time_index)
        {
            self.active_index = idx;
        }
    }

    /// Halves `dt`, per the bounded-retry policy for any transient
    /// numerical failure (negative pressure, negative moles, volume error
    /// above `Verrmax`, CFL > 1, Newton non-convergence). Returns `Err` if
    /// the halved `dt` would fall below `timeMin` — a retry that would do
    /// so is promoted to fatal.
    pub fn halve_dt(&mut self, reason: &str) -> Result<(), String> {
        let tp = self.time_params();
        let candidate = self.dt * tp.min_chop_fac.min(0.5);
        if candidate < tp.time_min {
            return Err(format!("dt {candidate} below timeMin {} while retrying: {reason}", tp.time_min));
        }
        self.diagnostics.retry(self.current_time, reason.to_string());
        self.dt = candidate;
        Ok(())
    }

    /// Cuts `dt` by `cutFacNR` for a Newton-iteration retry, distinct from
    /// the plain halving used by the other transient-failure checks.
    pub fn cut_dt_for_newton(&mut self, reason: &str) -> Result<(), String> {
        let tp = self.time_params();
        let candidate = self.dt * tp.cut_fac_nr;
        if candidate < tp.time_min {
            return Err(format!("dt {candidate} below timeMin {} during Newton cut: {reason}", tp.time_min));
        }
        self.diagnostics.retry(self.current_time, reason.to_string());
        self.dt = candidate;
        Ok(())
    }

    /// `dt' = dt * min(c1, c2, c3, c4)`, clamped to
    /// `[minChopFac*dt, maxIncreFac*dt] ∩ [timeMin, timeMax]`, where
    /// `c1..c4` are the ratios of each predictive limit to the step's
    /// observed maximum change.
    pub fn predict_next_dt(&self, d_p_max: f64, d_s_max: f64, d_n_max: f64, d_v_max: f64) -> f64 {
        let pp = self.predict_params();
        let tp = self.time_params();
        let ratio = |lim: f64, observed: f64| if observed > 0.0 { lim / observed } else { tp.max_incre_fac };
        let c1 = ratio(pp.d_p_lim, d_p_max);
        let c2 = ratio(pp.d_s_lim, d_s_max);
        let c3 = ratio(pp.d_n_lim, d_n_max);
        let c4 = ratio(pp.d_v_lim, d_v_max);
        let factor = c1.min(c2).min(c3).min(c4);

        let unclamped = self.dt * factor;
        let lower = (self.dt * tp.min_chop_fac).max(tp.time_min);
        let upper = (self.dt * tp.max_incre_fac).min(tp.time_max);
        unclamped.clamp(lower.min(upper), upper)
    }

    /// FIM's next-`dt` rule: `dt' = dt * min(dPlim/dPmax, dSlim/dSmax,
    /// c_iter)`, with `c_iter` keyed by how many Newton iterations the
    /// step took, clamped the same way as `predict_next_dt`.
    pub fn predict_next_dt_fim(&self, d_p_max: f64, d_s_max: f64, nr_iterations: usize) -> f64 {
        let pp = self.predict_params();
        let tp = self.time_params();
        let ratio = |lim: f64, observed: f64| if observed > 0.0 { lim / observed } else { tp.max_incre_fac };
        let c1 = ratio(pp.d_p_lim, d_p_max);
        let c2 = ratio(pp.d_s_lim, d_s_max);
        let c_iter = if nr_iterations < 3 {
            2.0
        } else if nr_iterations > 8 {
            0.5
        } else {
            1.5
        };
        let factor = c1.min(c2).min(c_iter);

        let unclamped = self.dt * factor;
        let lower = (self.dt * tp.min_chop_fac).max(tp.time_min);
        let upper = (self.dt * tp.max_incre_fac).min(tp.time_max);
        unclamped.clamp(lower.min(upper), upper)
    }

    /// Commits a successful step: advances `current_time`, rotates
    /// `last_dt`, folds the step's solver stats into the cumulative
    /// counters, and sets `dt` for the next step.
    pub fn commit_step(&mut self, stats: StepStats, next_dt: f64) {
        self.current_time += self.dt;
        self.last_dt = self.dt;
        self.total_steps += 1;
        self.cumulative_nr_iterations += stats.nr_iterations;
        self.cumulative_linear_iterations += stats.linear_iterations;
        self.cumulative_linear_solver_time += stats.linear_solver_time;
        self.dt = next_dt;
    }

    pub fn record_linear_solve(stats: &mut StepStats, report: SolveReport, elapsed: Duration) {
        stats.linear_iterations += report.iterations;
        stats.linear_solver_time += elapsed;
    }

    pub fn is_finished(&self) -> bool {
        self.current_time >= self.time_params().time_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_entry_schedule() -> Vec<CriticalTimeParams> {
        vec![CriticalTimeParams {
            critical_time_index: 0,
            time: TimeParams::default(),
            predict: PredictParams::default(),
            nr: NrParams::default(),
        }]
    }

    #[test]
    fn halve_dt_fails_below_time_min() {
        let mut control = Control::new(one_entry_schedule());
        control.dt = control.time_params().time_min * 1.5;
        assert!(control.halve_dt("cfl > 1").is_ok());
        assert!(control.halve_dt("cfl > 1 again").is_err());
    }

    #[test]
    fn predict_next_dt_is_limited_by_the_tightest_ratio() {
        let control = Control::new(one_entry_schedule());
        let next = control.predict_next_dt(400.0, 0.05, 0.05, 0.005);
        let pp = control.predict_params();
        assert!((next - control.dt * (pp.d_p_lim / 400.0)).abs() < 1.0e-9);
    }

    #[test]
    fn predict_next_dt_fim_uses_c_iter_tiers() {
        let control = Control::new(one_entry_schedule());
        let fast = control.predict_next_dt_fim(1.0, 0.001, 2);
        let slow = control.predict_next_dt_fim(1.0, 0.001, 9);
        assert!(fast >= slow);
    }

    #[test]
    fn apply_schedule_switches_active_entry() {
        let mut schedule = one_entry_schedule();
        let mut second = schedule[0];
        second.critical_time_index = 5;
        second.time.time_max = 999.0;
        schedule.push(second);
        let mut control = Control::new(schedule);
        control.apply_schedule(10);
        assert_eq!(control.time_params().time_max, 999.0);
    }

    #[test]
    fn commit_step_advances_time_and_accumulates_stats() {
        let mut control = Control::new(one_entry_schedule());
        let stats = StepStats { nr_iterations: 3, linear_iterations: 12, linear_solver_time: Duration::from_millis(5) };
        let start = control.current_time;
        control.commit_step(stats, 2.0);
        assert!(control.current_time > start);
        assert_eq!(control.cumulative_nr_iterations, 3);
        assert_eq!(control.cumulative_linear_iterations, 12);
        assert_eq!(control.dt, 2.0);
    }
}
