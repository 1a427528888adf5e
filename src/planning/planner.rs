//! Linear-program dispatch planner over one scenario.
//!
//! Decision variables per storage resource and horizon step:
//! charge and discharge power in `[0, c_rate * capacity]`, state of charge in
//! `[0, capacity]` (H+1 points). One signed import variable per step in
//! `[-cap, cap]` plus its positive part. The objective minimises total
//! positive import and a small throughput penalty standing in for
//! conversion losses.
//!
//! Power balance per step: `import + Σ(discharge - charge) = load - production`.

use good_lp::{
    Constraint, Expression, ProblemVariables, Solution, SolverModel, Variable, constraint,
    default_solver, variable,
};
use tracing::{debug, warn};

use super::action::{Action, Plan, PlanSlice};
use super::scenario::Scenario;
use crate::error::PlanError;

/// Values below this magnitude do not produce actions.
pub const ACTION_THRESHOLD: f64 = 1e-3;
/// Objective weight on charge + discharge throughput.
pub const THROUGHPUT_PENALTY: f64 = 0.01;

/// Static capability metadata for one storage resource.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSpec {
    pub id: String,
    pub capacity_kwh: f64,
    pub eta_charge: f64,
    pub eta_discharge: f64,
    /// Maximum power as a multiple of capacity per tick.
    pub c_rate: f64,
}

impl StorageSpec {
    /// Power bound for charge and discharge (kW).
    pub fn max_power_kw(&self) -> f64 {
        self.c_rate * self.capacity_kwh
    }
}

/// Raw solver output, indexed `[resource][step]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub charge: Vec<Vec<f64>>,
    pub discharge: Vec<Vec<f64>>,
    /// H+1 points per resource; index 0 is the initial state.
    pub soc: Vec<Vec<f64>>,
    pub import: Vec<f64>,
    /// Production minus load per step, copied from the scenario.
    pub net: Vec<f64>,
}

/// Deterministic planner configured with the microgrid's static capabilities.
#[derive(Debug, Clone)]
pub struct DeterministicPlanner {
    storages: Vec<StorageSpec>,
    external_id: String,
    import_cap_kw: f64,
}

impl DeterministicPlanner {
    /// Creates a planner.
    ///
    /// # Arguments
    ///
    /// * `storages` - Storage resources the plan may dispatch
    /// * `external_id` - Actor id of the external grid connection
    /// * `import_cap_kw` - Symmetric bound on import and export (kW, ≥ 0)
    pub fn new(
        storages: Vec<StorageSpec>,
        external_id: impl Into<String>,
        import_cap_kw: f64,
    ) -> Self {
        Self {
            storages,
            external_id: external_id.into(),
            import_cap_kw: import_cap_kw.max(0.0),
        }
    }

    pub fn storages(&self) -> &[StorageSpec] {
        &self.storages
    }

    /// Solves for a plan from each resource's stored energy, in
    /// [`storages`](Self::storages) order.
    ///
    /// Never fails: solver errors are logged and yield an empty plan.
    pub fn plan(&self, scenario: &Scenario, initial_soc: &[f64]) -> Plan {
        match self.solve(scenario, initial_soc) {
            Ok(schedule) => {
                let plan = self.to_plan(&schedule);
                debug!(
                    slices = plan.slices.len(),
                    actions = plan.action_count(),
                    "plan solved"
                );
                plan
            }
            Err(e) => {
                warn!(error = %e, "planner produced no plan");
                Plan::empty()
            }
        }
    }

    /// Formulates and solves the LP with explicit per-resource initial SoC.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the scenario is malformed or the solver
    /// does not reach an optimum (including infeasibility).
    pub fn solve(&self, scenario: &Scenario, initial_soc: &[f64]) -> Result<Schedule, PlanError> {
        let h = scenario.load.len();
        if scenario.production.len() != h {
            return Err(PlanError::HorizonMismatch {
                load: h,
                production: scenario.production.len(),
            });
        }

        let mut vars = ProblemVariables::new();
        let mut charge: Vec<Vec<Variable>> = Vec::with_capacity(self.storages.len());
        let mut discharge: Vec<Vec<Variable>> = Vec::with_capacity(self.storages.len());
        let mut soc: Vec<Vec<Variable>> = Vec::with_capacity(self.storages.len());
        for s in &self.storages {
            let p_max = s.max_power_kw().max(0.0);
            charge.push((0..h).map(|_| vars.add(variable().min(0.0).max(p_max))).collect());
            discharge.push((0..h).map(|_| vars.add(variable().min(0.0).max(p_max))).collect());
            soc.push(
                (0..=h)
                    .map(|_| vars.add(variable().min(0.0).max(s.capacity_kwh)))
                    .collect(),
            );
        }
        let cap = self.import_cap_kw;
        let import: Vec<Variable> = (0..h)
            .map(|_| vars.add(variable().min(-cap).max(cap)))
            .collect();
        let import_pos: Vec<Variable> = (0..h)
            .map(|_| vars.add(variable().min(0.0).max(cap)))
            .collect();

        let mut objective_terms: Vec<Expression> = import_pos.iter().map(|&v| 1.0 * v).collect();
        for r in 0..self.storages.len() {
            for k in 0..h {
                objective_terms.push(THROUGHPUT_PENALTY * charge[r][k]);
                objective_terms.push(THROUGHPUT_PENALTY * discharge[r][k]);
            }
        }
        let objective: Expression = objective_terms.into_iter().sum();

        let mut constraints: Vec<Constraint> = Vec::new();
        for (r, s) in self.storages.iter().enumerate() {
            let start = initial_soc
                .get(r)
                .copied()
                .unwrap_or(0.0)
                .clamp(0.0, s.capacity_kwh);
            constraints.push(constraint!(soc[r][0] == start));
            let inv_d = 1.0 / s.eta_discharge;
            for k in 0..h {
                let dynamics: Expression = 1.0 * soc[r][k + 1] - 1.0 * soc[r][k]
                    - s.eta_charge * charge[r][k]
                    + inv_d * discharge[r][k];
                constraints.push(constraint!(dynamics == 0.0));
            }
        }
        for k in 0..h {
            let mut terms: Vec<Expression> = vec![1.0 * import[k]];
            for r in 0..self.storages.len() {
                terms.push(1.0 * discharge[r][k]);
                terms.push(-1.0 * charge[r][k]);
            }
            // Discharge feeds the bus and charge draws from it, so storage
            // enters as discharge - charge, the reverse of its SoC update.
            let balance: Expression = terms.into_iter().sum();
            let demand = scenario.load[k] - scenario.production[k];
            constraints.push(constraint!(balance == demand));
            constraints.push(constraint!(import_pos[k] >= import[k]));
        }

        let mut problem = vars.minimise(objective).using(default_solver);
        for c in constraints {
            problem = problem.with(c);
        }
        let solution = problem.solve()?;

        let values =
            |row: &Vec<Variable>| row.iter().map(|&v| solution.value(v)).collect::<Vec<f64>>();
        Ok(Schedule {
            charge: charge.iter().map(values).collect(),
            discharge: discharge.iter().map(values).collect(),
            soc: soc.iter().map(values).collect(),
            import: values(&import),
            net: (0..h).map(|k| scenario.net_kw(k)).collect(),
        })
    }

    /// Converts a schedule into per-offset action slices.
    ///
    /// Every horizon step yields a slice, even when it holds no actions, so
    /// the planned net stays aligned with tick offsets.
    pub fn to_plan(&self, schedule: &Schedule) -> Plan {
        let slices = (0..schedule.net.len())
            .map(|k| {
                let mut actions = Vec::new();
                for (r, s) in self.storages.iter().enumerate() {
                    let c = schedule.charge[r][k];
                    let d = schedule.discharge[r][k];
                    if c > ACTION_THRESHOLD {
                        actions.push(Action {
                            tick_offset: k,
                            target: s.id.clone(),
                            charge_kw: c,
                            import_kw: 0.0,
                        });
                    }
                    if d > ACTION_THRESHOLD {
                        actions.push(Action {
                            tick_offset: k,
                            target: s.id.clone(),
                            charge_kw: -d,
                            import_kw: 0.0,
                        });
                    }
                }
                let ext = schedule.import[k];
                if ext.abs() > ACTION_THRESHOLD {
                    actions.push(Action {
                        tick_offset: k,
                        target: self.external_id.clone(),
                        charge_kw: 0.0,
                        import_kw: ext,
                    });
                }
                PlanSlice {
                    tick_offset: k,
                    planned_net_kw: schedule.net[k],
                    actions,
                }
            })
            .collect();
        Plan { slices }
    }
}
