use crate::eligibility_trace::EligibilityTrace;
use crate::td::{choose_action_unless_terminal, predict_next_value};
use bincode::{Decode, Encode};
use candle_core::Result;
use gpi_core::gpi::Agent;
use gpi_core::policy::{GreedyPolicy, Policy, PolicyKind};
use gpi_core::task::Task;
use gpi_core::utils::{dump_to_file, load_from_file};
use gpi_core::value_function::ActionValueFunction;
use rand::rngs::StdRng;
use std::path::Path;

const TRACE_FILE: &str = "q_lambda_eligibility_trace.bin";

/// Watkins Q(lambda): Q-learning whose TD error is broadcast to every pair
/// with non-zero eligibility, scaled by the trace weight. Because the backup
/// target follows the greedy action while the behavior policy may not, the
/// trace is cleared whenever the two diverge. Credit assigned beyond that
/// point would belong to a different policy.
pub struct QLambda<T: Task> {
    alpha: f64,
    gamma: f64,
    trace: EligibilityTrace<T::State, T::Action>,
    greedy_policy: GreedyPolicy,
}

impl<T: Task> QLambda<T> {
    pub fn new(
        alpha: f64,
        gamma: f64,
        trace: EligibilityTrace<T::State, T::Action>,
        rng: StdRng,
    ) -> Self {
        Self {
            alpha,
            gamma,
            trace,
            greedy_policy: GreedyPolicy::new(rng),
        }
    }

    pub fn trace(&self) -> &EligibilityTrace<T::State, T::Action> {
        &self.trace
    }
}

impl<T, V> Agent<T, V> for QLambda<T>
where
    T: Task,
    T::State: Encode + Decode<()>,
    T::Action: Encode + Decode<()>,
    V: ActionValueFunction<T>,
{
    fn episode_update(
        &mut self,
        task: &T,
        policy: &mut PolicyKind<T, V>,
        value_function: &mut V,
    ) -> Result<()> {
        let mut state = task.generate_initial_state();
        let mut action = policy.choose_action(task, &*value_function, &state)?;
        while !task.is_terminal_state(&state) {
            let next_state = task.transit_state(&state, &action);
            let reward = task.calculate_reward(&next_state);
            let next_action =
                choose_action_unless_terminal(task, policy, &*value_function, &next_state)?;
            let greedy_action = choose_action_unless_terminal(
                task,
                &mut self.greedy_policy,
                &*value_function,
                &next_state,
            )?;
            let value = value_function.predict_value(&state, &action)?;
            let greedy_value =
                predict_next_value::<T, V>(value_function, &next_state, &greedy_action)?;
            let delta = reward + self.gamma * greedy_value - value;

            self.trace.update(&state, &action);
            for (traced_state, traced_action, eligibility) in self.trace.get_eligibilities() {
                let traced_value = value_function.predict_value(&traced_state, &traced_action)?;
                value_function.backup(
                    &traced_state,
                    &traced_action,
                    traced_value + delta * eligibility,
                    self.alpha,
                )?;
                self.trace.decay(&traced_state, &traced_action);
            }
            if greedy_action != next_action {
                self.trace.clear();
            }

            state = next_state;
            match next_action {
                Some(next_action) => action = next_action,
                None => break,
            }
        }
        Ok(())
    }

    fn save_algorithm_state(&self, save_dir: &Path) -> Result<()> {
        dump_to_file(&save_dir.join(TRACE_FILE), &self.trace)
    }

    fn load_algorithm_state(&mut self, load_dir: &Path) -> Result<()> {
        self.trace = load_from_file(&load_dir.join(TRACE_FILE), "QLambda eligibility trace")?;
        Ok(())
    }
}
