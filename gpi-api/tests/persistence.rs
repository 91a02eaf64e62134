use gpi_agents::montecarlo::MonteCarlo;
use gpi_agents::sarsa::Sarsa;
use gpi_api::test_utils::ChainTask;
use gpi_core::gpi::Gpi;
use gpi_core::policy::{GreedyPolicy, PolicyKind};
use gpi_core::value_function::{ActionValueFunction, TableActionValueFunction};
use std::path::PathBuf;

fn tmp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gpi-persistence-{name}-{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn sarsa_gpi() -> Gpi<ChainTask, TableActionValueFunction<ChainTask>, Sarsa> {
    Gpi::new(
        ChainTask::new(7),
        PolicyKind::Greedy(GreedyPolicy::seeded(0)),
        TableActionValueFunction::new(),
        Sarsa::default(),
    )
    .unwrap()
}

#[test]
fn training_resumed_from_a_checkpoint_matches_an_uninterrupted_run() {
    let dir = tmp_dir("sarsa-resume");

    let mut interrupted = sarsa_gpi();
    interrupted.train(1, vec![]).unwrap();
    interrupted.save(&dir).unwrap();

    let mut resumed = sarsa_gpi();
    resumed.load(&dir).unwrap();
    resumed.train(1, vec![]).unwrap();

    let mut uninterrupted = sarsa_gpi();
    uninterrupted.train(2, vec![]).unwrap();

    for (state, action) in [(0u32, 1u32), (1, 2), (3, 4)] {
        let resumed_value = resumed.value_function.predict_value(&state, &action).unwrap();
        let straight_value = uninterrupted
            .value_function
            .predict_value(&state, &action)
            .unwrap();
        assert_eq!(straight_value, resumed_value);
    }
    // two episodes of the single-path chain with alpha 0.1 and gamma 0.9
    assert!((resumed.value_function.predict_value(&0, &1).unwrap() - 0.271).abs() < 1e-12);
    assert!((resumed.value_function.predict_value(&1, &2).unwrap() - 2.151).abs() < 1e-12);
    assert!((resumed.value_function.predict_value(&3, &4).unwrap() - 9.31).abs() < 1e-12);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn monte_carlo_visit_counts_survive_a_reload() {
    let dir = tmp_dir("montecarlo-resume");

    let mut first = Gpi::new(
        ChainTask::new(7),
        PolicyKind::Greedy(GreedyPolicy::seeded(0)),
        TableActionValueFunction::new(),
        MonteCarlo::default(),
    )
    .unwrap();
    first.train(1, vec![]).unwrap();
    first.save(&dir).unwrap();

    let mut second = Gpi::new(
        ChainTask::new(7),
        PolicyKind::Greedy(GreedyPolicy::seeded(0)),
        TableActionValueFunction::new(),
        MonteCarlo::default(),
    )
    .unwrap();
    second.load(&dir).unwrap();
    second.train(1, vec![]).unwrap();

    assert_eq!(2, second.agent.update_count(&0, &1));
    assert_eq!(2, second.agent.update_count(&3, &4));
    // identical returns keep the running average in place
    assert_eq!(59.0, second.value_function.predict_value(&0, &1).unwrap());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn the_learning_recorder_checkpoints_on_its_interval() {
    use gpi_core::callback::LearningRecorder;

    let dir = tmp_dir("recorder");
    let mut gpi = sarsa_gpi();
    gpi.train(2, vec![Box::new(LearningRecorder::new(dir.clone(), 1))])
        .unwrap();
    for sub_dir in ["after_1_iteration", "after_2_iteration", "gpi_finished"] {
        let table_file = dir.join(sub_dir).join("table_action_value_function.bin");
        assert!(table_file.exists(), "missing checkpoint {sub_dir}");
    }

    let mut restored = sarsa_gpi();
    restored.load(&dir.join("gpi_finished")).unwrap();
    assert!((restored.value_function.predict_value(&3, &4).unwrap() - 9.31).abs() < 1e-12);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn a_missing_recorder_directory_aborts_the_run() {
    use gpi_core::callback::LearningRecorder;

    let missing = std::env::temp_dir().join(format!("gpi-no-such-dir-{}", std::process::id()));
    let mut gpi = sarsa_gpi();
    let err = gpi
        .train(1, vec![Box::new(LearningRecorder::new(missing, 1))])
        .unwrap_err();
    assert!(err.to_string().contains("LearningRecorder"));
}

#[test]
fn loading_from_a_directory_that_was_never_saved_fails_loudly() {
    let dir = tmp_dir("never-saved");
    let mut gpi = sarsa_gpi();
    let err = gpi.load(&dir).unwrap_err();
    assert!(err.to_string().contains("not found"));
    std::fs::remove_dir_all(&dir).unwrap();
}
