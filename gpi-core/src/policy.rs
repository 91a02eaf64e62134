use crate::task::Task;
use crate::value_function::ActionValueFunction;
use candle_core::{Result, bail};
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Chooses an action for a state given the task and the current value
/// estimates.
pub trait Policy<T: Task, V: ActionValueFunction<T>> {
    fn choose_action(
        &mut self,
        task: &T,
        value_function: &V,
        state: &T::State,
    ) -> Result<T::Action>;
}

/// Evaluates every possible action in `state` and picks one with the maximum
/// value. Ties are broken uniformly at random, never by position.
pub fn choose_best_action<T: Task, V: ActionValueFunction<T>>(
    task: &T,
    value_function: &V,
    state: &T::State,
    rng: &mut StdRng,
) -> Result<T::Action> {
    let actions = task.generate_possible_actions(state);
    if actions.is_empty() {
        bail!("no possible action to choose from, the task violates its contract");
    }
    let mut values = Vec::with_capacity(actions.len());
    for action in &actions {
        values.push(value_function.predict_value(state, action)?);
    }
    let max_value = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let best_actions: Vec<T::Action> = actions
        .into_iter()
        .zip(values)
        .filter(|(_, value)| *value == max_value)
        .map(|(action, _)| action)
        .collect();
    match best_actions.choose(rng) {
        Some(action) => Ok(action.clone()),
        None => bail!("no possible action to choose from, the task violates its contract"),
    }
}

pub struct GreedyPolicy {
    rng: StdRng,
}

impl GreedyPolicy {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl Default for GreedyPolicy {
    fn default() -> Self {
        Self::new(StdRng::from_os_rng())
    }
}

impl<T: Task, V: ActionValueFunction<T>> Policy<T, V> for GreedyPolicy {
    fn choose_action(
        &mut self,
        task: &T,
        value_function: &V,
        state: &T::State,
    ) -> Result<T::Action> {
        choose_best_action(task, value_function, state, &mut self.rng)
    }
}

/// Soft policy: with probability `1 - eps` acts greedily, the remaining
/// probability mass is spread uniformly over all possible actions (the greedy
/// one included). Supports linear epsilon annealing between training
/// iterations.
pub struct EpsilonGreedyPolicy {
    pub eps: f64,
    pub do_annealing: bool,
    min_eps: f64,
    anneal_step: f64,
    rng: StdRng,
}

impl EpsilonGreedyPolicy {
    pub fn new(eps: f64, rng: StdRng) -> Self {
        Self {
            eps,
            do_annealing: false,
            min_eps: 0.0,
            anneal_step: 0.0,
            rng,
        }
    }

    pub fn seeded(eps: f64, seed: u64) -> Self {
        Self::new(eps, StdRng::seed_from_u64(seed))
    }

    /// Enables annealing: epsilon starts at `initial_eps` and shrinks by
    /// `(initial_eps - final_eps) / anneal_duration` per `anneal_eps` call,
    /// clamped at `final_eps`.
    pub fn set_eps_annealing(&mut self, initial_eps: f64, final_eps: f64, anneal_duration: usize) {
        self.do_annealing = true;
        self.eps = initial_eps;
        self.min_eps = final_eps;
        self.anneal_step = (initial_eps - final_eps) / anneal_duration as f64;
    }

    pub fn anneal_eps(&mut self) {
        self.eps = self.min_eps.max(self.eps - self.anneal_step);
    }

    pub fn final_eps(&self) -> f64 {
        self.min_eps
    }
}

/// Walks the cumulative probability mass until the dart lands. Falls back to
/// the last action when rounding leaves the dart past the total.
fn roulette(probabilities: &[f64], dart: f64) -> usize {
    let mut acc = 0.0;
    for (idx, probability) in probabilities.iter().enumerate() {
        acc += probability;
        if dart < acc {
            return idx;
        }
    }
    probabilities.len() - 1
}

impl<T: Task, V: ActionValueFunction<T>> Policy<T, V> for EpsilonGreedyPolicy {
    fn choose_action(
        &mut self,
        task: &T,
        value_function: &V,
        state: &T::State,
    ) -> Result<T::Action> {
        let actions = task.generate_possible_actions(state);
        let best_action = choose_best_action(task, value_function, state, &mut self.rng)?;
        let explore = self.eps / actions.len() as f64;
        let bonus = 1.0 - self.eps;
        let probabilities: Vec<f64> = actions
            .iter()
            .map(|action| {
                if *action == best_action {
                    explore + bonus
                } else {
                    explore
                }
            })
            .collect();
        let dart: f64 = self.rng.random();
        let selected = roulette(&probabilities, dart);
        Ok(actions[selected].clone())
    }
}

/// The policies shipped with the library plus an escape hatch for custom ones.
/// Dispatch is an explicit match, following the other `*Kind` enums.
pub enum PolicyKind<T: Task, V: ActionValueFunction<T>> {
    Greedy(GreedyPolicy),
    EpsilonGreedy(EpsilonGreedyPolicy),
    Custom(Box<dyn Policy<T, V>>),
}

impl<T: Task, V: ActionValueFunction<T>> Policy<T, V> for PolicyKind<T, V> {
    fn choose_action(
        &mut self,
        task: &T,
        value_function: &V,
        state: &T::State,
    ) -> Result<T::Action> {
        match self {
            Self::Greedy(policy) => policy.choose_action(task, value_function, state),
            Self::EpsilonGreedy(policy) => policy.choose_action(task, value_function, state),
            Self::Custom(policy) => policy.choose_action(task, value_function, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_function::TableActionValueFunction;

    struct ThreeActionTask;

    impl Task for ThreeActionTask {
        type State = u32;
        type Action = u32;

        fn generate_initial_state(&self) -> u32 {
            0
        }

        fn is_terminal_state(&self, state: &u32) -> bool {
            *state > 0
        }

        fn transit_state(&self, _state: &u32, action: &u32) -> u32 {
            *action
        }

        fn generate_possible_actions(&self, _state: &u32) -> Vec<u32> {
            vec![1, 2, 3]
        }

        fn calculate_reward(&self, _state: &u32) -> f64 {
            0.0
        }
    }

    fn value_function_with(values: [f64; 3]) -> TableActionValueFunction<ThreeActionTask> {
        let mut value_function = TableActionValueFunction::new();
        value_function.setup().unwrap();
        for (action, value) in [1u32, 2, 3].iter().zip(values) {
            value_function.backup(&0, action, value, 1.0).unwrap();
        }
        value_function
    }

    #[test]
    fn roulette_boundaries_match_the_selection_probabilities() {
        // eps = 0.3 over three actions with the middle one greedy: each
        // non-greedy action gets eps / 3 = 0.1, the greedy one 0.1 + 0.7.
        let probabilities = [0.1, 0.8, 0.1];
        let eps = 1e-4;
        assert_eq!(0, roulette(&probabilities, 0.0));
        assert_eq!(0, roulette(&probabilities, 0.1 - eps));
        assert_eq!(1, roulette(&probabilities, 0.1));
        assert_eq!(1, roulette(&probabilities, 0.9 - eps));
        assert_eq!(2, roulette(&probabilities, 0.9));
        assert_eq!(2, roulette(&probabilities, 1.0 - eps));
        // a dart past the accumulated mass falls back to the last action
        assert_eq!(2, roulette(&probabilities, 1.0));
    }

    #[test]
    fn annealing_decreases_linearly_and_clamps() {
        let mut policy = EpsilonGreedyPolicy::seeded(0.5, 0);
        assert!(!policy.do_annealing);
        policy.set_eps_annealing(1.0, 0.1, 9);
        assert!(policy.do_annealing);
        let mut expected: Vec<f64> = (1..=9).rev().map(|i| i as f64 * 0.1).collect();
        expected.extend([0.1, 0.1]);
        for eps in expected {
            policy.anneal_eps();
            assert!((policy.eps - eps).abs() < 1e-6);
        }
    }

    #[test]
    fn greedy_policy_picks_the_highest_valued_action() {
        let task = ThreeActionTask;
        let value_function = value_function_with([100.0, 150.0, 50.0]);
        let mut policy = GreedyPolicy::seeded(7);
        for _ in 0..10 {
            let action = policy.choose_action(&task, &value_function, &0).unwrap();
            assert_eq!(2, action);
        }
    }

    #[test]
    fn greedy_ties_are_broken_at_random() {
        let task = ThreeActionTask;
        let value_function = value_function_with([100.0, 100.0, 50.0]);
        let mut policy = GreedyPolicy::seeded(7);
        let mut chosen = std::collections::HashSet::new();
        for _ in 0..100 {
            chosen.insert(policy.choose_action(&task, &value_function, &0).unwrap());
        }
        assert_eq!(chosen, [1u32, 2].into_iter().collect());
    }

    #[test]
    fn epsilon_one_explores_every_action() {
        let task = ThreeActionTask;
        let value_function = value_function_with([100.0, 150.0, 50.0]);
        let mut policy = EpsilonGreedyPolicy::seeded(1.0, 11);
        let mut chosen = std::collections::HashSet::new();
        for _ in 0..200 {
            chosen.insert(policy.choose_action(&task, &value_function, &0).unwrap());
        }
        assert_eq!(chosen, [1u32, 2, 3].into_iter().collect());
    }
}
