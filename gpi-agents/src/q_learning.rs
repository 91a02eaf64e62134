use crate::td::{choose_action_unless_terminal, predict_next_value};
use candle_core::Result;
use gpi_core::gpi::Agent;
use gpi_core::policy::{GreedyPolicy, Policy, PolicyKind};
use gpi_core::task::Task;
use gpi_core::value_function::ActionValueFunction;
use rand::rngs::StdRng;

/// Off-policy one-step temporal difference learning. Actions during the
/// episode come from the behavior policy, but the backup target always uses
/// the greedy action at the next state:
/// `Q(S, A) <- Q(S, A) + alpha * (R + gamma * Q(S', GA) - Q(S, A))`.
pub struct QLearning {
    alpha: f64,
    gamma: f64,
    greedy_policy: GreedyPolicy,
}

impl QLearning {
    /// `rng` feeds the internal greedy policy used for backup targets, where
    /// value ties are broken at random.
    pub fn new(alpha: f64, gamma: f64, rng: StdRng) -> Self {
        Self {
            alpha,
            gamma,
            greedy_policy: GreedyPolicy::new(rng),
        }
    }
}

impl<T: Task, V: ActionValueFunction<T>> Agent<T, V> for QLearning {
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
            let next_action =
                choose_action_unless_terminal(task, policy, &*value_function, &next_state)?;
            let reward = task.calculate_reward(&next_state);
            let greedy_action = choose_action_unless_terminal(
                task,
                &mut self.greedy_policy,
                &*value_function,
                &next_state,
            )?;
            let greedy_value =
                predict_next_value::<T, V>(value_function, &next_state, &greedy_action)?;
            let backup_target = reward + self.gamma * greedy_value;
            value_function.backup(&state, &action, backup_target, self.alpha)?;
            state = next_state;
            match next_action {
                Some(next_action) => action = next_action,
                None => break,
            }
        }
        Ok(())
    }
}
