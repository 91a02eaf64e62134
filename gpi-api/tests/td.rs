use gpi_agents::q_learning::QLearning;
use gpi_agents::sarsa::Sarsa;
use gpi_api::test_utils::{BranchingChainTask, NegativePolicy};
use gpi_core::gpi::Gpi;
use gpi_core::policy::PolicyKind;
use gpi_core::table::StateActionTable;
use gpi_core::value_function::{ActionValueFunction, TableActionValueFunction};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Pre-seeded estimates so the behavior policy (worst action) and the greedy
/// backup target visibly disagree.
fn seeded_table() -> StateActionTable<u32, u32, f64> {
    let mut table = StateActionTable::new(0.0);
    table.set(1, 2, 10.0);
    table.set(1, 3, 11.0);
    table.set(3, 4, 100.0);
    table.set(3, 5, 101.0);
    table
}

#[test]
fn sarsa_backs_up_the_action_the_policy_takes_next() {
    let mut gpi = Gpi::new(
        BranchingChainTask::new(7),
        PolicyKind::Custom(Box::new(NegativePolicy)),
        TableActionValueFunction::with_initial_table(seeded_table()),
        Sarsa::new(0.5, 0.1),
    )
    .unwrap();
    gpi.train(1, vec![]).unwrap();
    // the negative policy walks 0 -> 1 -> 3 -> 7
    assert!((gpi.value_function.predict_value(&0, &1).unwrap() - 1.0).abs() < 1e-12);
    assert!((gpi.value_function.predict_value(&1, &2).unwrap() - 14.5).abs() < 1e-12);
    assert!((gpi.value_function.predict_value(&3, &4).unwrap() - 74.5).abs() < 1e-12);
    // the untaken branches keep their initial estimates
    assert_eq!(11.0, gpi.value_function.predict_value(&1, &3).unwrap());
    assert_eq!(101.0, gpi.value_function.predict_value(&3, &5).unwrap());
}

#[test]
fn q_learning_backs_up_the_greedy_action_instead() {
    let mut gpi = Gpi::new(
        BranchingChainTask::new(7),
        PolicyKind::Custom(Box::new(NegativePolicy)),
        TableActionValueFunction::with_initial_table(seeded_table()),
        QLearning::new(0.5, 0.1, StdRng::seed_from_u64(0)),
    )
    .unwrap();
    gpi.train(1, vec![]).unwrap();
    // same walk as sarsa, but the targets use max Q at the next state
    assert!((gpi.value_function.predict_value(&0, &1).unwrap() - 1.05).abs() < 1e-12);
    assert!((gpi.value_function.predict_value(&1, &2).unwrap() - 14.55).abs() < 1e-12);
    assert!((gpi.value_function.predict_value(&3, &4).unwrap() - 74.5).abs() < 1e-12);
}

#[test]
fn backups_of_unrelated_pairs_do_not_interfere() {
    let mut lone: TableActionValueFunction<BranchingChainTask> = TableActionValueFunction::new();
    lone.setup().unwrap();
    let mut interleaved: TableActionValueFunction<BranchingChainTask> =
        TableActionValueFunction::new();
    interleaved.setup().unwrap();

    for (k, target) in [5.0, 3.0, 8.0, -2.0].into_iter().enumerate() {
        lone.backup(&0, &1, target, 0.25).unwrap();
        interleaved.backup(&0, &1, target, 0.25).unwrap();
        interleaved.backup(&9, &9, 100.0 * k as f64, 0.5).unwrap();
        interleaved.backup(&7, &2, -1.0, 1.0).unwrap();
    }
    assert_eq!(
        lone.predict_value(&0, &1).unwrap(),
        interleaved.predict_value(&0, &1).unwrap()
    );
}
