//! Forecast-to-plan pipeline: scenario generation, selection and the LP.

mod common;

use microgrid_twin::planning::{
    DeterministicPlanner, MonteCarlo, QuantileTree, Scenario, ScenarioGenerator, ScenarioSelection,
};

const TOL: f64 = 1e-5;

#[test]
fn quantile_tree_weights_sum_to_one_with_median_in_the_middle() {
    let load = common::quantiles(40.0, 50.0, 65.0, 6);
    let production = common::quantiles(10.0, 30.0, 45.0, 6);
    let scenarios = QuantileTree.generate(&load, &production);

    assert_eq!(scenarios.len(), 3);
    let total: f64 = scenarios.iter().map(|s| s.probability).sum();
    assert!((total - 1.0).abs() < 1e-12);
    assert_eq!(scenarios[1].load, load.q50);
    assert_eq!(scenarios[1].production, production.q50);
    assert_eq!(scenarios[1].probability, 0.70);

    let chosen = ScenarioSelection::ClosestToMedian.select(&scenarios, &load, &production);
    assert_eq!(chosen, Some(&scenarios[1]));
}

#[test]
fn monte_carlo_draws_are_non_negative_and_equally_weighted() {
    let load = common::quantiles(0.0, 5.0, 20.0, 8);
    let production = common::quantiles(0.0, 2.0, 12.0, 8);
    let mut generator = MonteCarlo::new(40, 0.8, 0.3, 7);
    let scenarios = generator.generate(&load, &production);

    assert_eq!(scenarios.len(), 40);
    for s in &scenarios {
        assert_eq!(s.horizon(), 8);
        assert!(s.load.iter().chain(&s.production).all(|v| *v >= 0.0));
        assert!((s.probability - 1.0 / 40.0).abs() < 1e-12);
    }
    assert!(
        ScenarioSelection::ClosestToMedian
            .select(&scenarios, &load, &production)
            .is_some()
    );
}

#[test]
fn planner_respects_balance_and_bounds() {
    let storages = vec![
        common::storage("big", 100.0, 0.5),
        common::storage("small", 50.0, 1.0),
    ];
    let planner = DeterministicPlanner::new(storages.clone(), "grid", 40.0);
    let scenario = Scenario {
        load: vec![50.0, 80.0, 20.0, 60.0, 90.0],
        production: vec![70.0, 30.0, 40.0, 10.0, 0.0],
        probability: 1.0,
    };
    let initial = [50.0, 10.0];
    let sched = planner.solve(&scenario, &initial).unwrap();

    for k in 0..scenario.horizon() {
        let storage_net: f64 = (0..storages.len())
            .map(|r| sched.discharge[r][k] - sched.charge[r][k])
            .sum();
        let demand = scenario.load[k] - scenario.production[k];
        assert!(
            (sched.import[k] + storage_net - demand).abs() < TOL,
            "balance violated at step {k}"
        );
        assert!(sched.import[k].abs() <= 40.0 + TOL);
    }

    for (r, s) in storages.iter().enumerate() {
        assert!((sched.soc[r][0] - initial[r]).abs() < TOL);
        for k in 0..scenario.horizon() {
            assert!(sched.charge[r][k] >= -TOL && sched.charge[r][k] <= s.max_power_kw() + TOL);
            let d = sched.discharge[r][k];
            assert!(d >= -TOL && d <= s.max_power_kw() + TOL);
            let next = sched.soc[r][k] + sched.charge[r][k] - sched.discharge[r][k];
            assert!((sched.soc[r][k + 1] - next).abs() < TOL);
        }
        assert!(sched.soc[r].iter().all(|e| *e >= -TOL && *e <= s.capacity_kwh + TOL));
    }
}

#[test]
fn planner_prefers_storage_over_import() {
    let storages = vec![common::storage("bess", 100.0, 0.5)];
    let planner = DeterministicPlanner::new(storages, "grid", 100.0);
    let scenario = Scenario {
        load: vec![30.0; 2],
        production: vec![10.0; 2],
        probability: 1.0,
    };
    let plan = planner.plan(&scenario, &[100.0]);

    assert_eq!(plan.slices.len(), 2);
    for slice in &plan.slices {
        assert_eq!(slice.planned_net_kw, -20.0);
        assert_eq!(slice.actions.len(), 1);
        assert_eq!(slice.actions[0].target, "bess");
        assert!((slice.actions[0].charge_kw + 20.0).abs() < TOL);
    }
}

#[test]
fn infeasible_horizon_yields_an_empty_plan() {
    // 60 kWh of shortfall against 30 kWh stored and no grid.
    let planner = DeterministicPlanner::new(vec![common::storage("bess", 100.0, 0.5)], "grid", 0.0);
    let scenario = Scenario {
        load: vec![30.0; 3],
        production: vec![10.0; 3],
        probability: 1.0,
    };
    assert!(planner.plan(&scenario, &[30.0]).is_empty());
}
