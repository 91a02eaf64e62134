use crate::td::{choose_action_unless_terminal, predict_next_value};
use candle_core::Result;
use gpi_core::gpi::Agent;
use gpi_core::policy::{Policy, PolicyKind};
use gpi_core::task::Task;
use gpi_core::value_function::ActionValueFunction;

/// On-policy one-step temporal difference learning. The action that forms the
/// backup target is the one the behavior policy will actually take next:
/// `Q(S, A) <- Q(S, A) + alpha * (R + gamma * Q(S', A') - Q(S, A))`.
pub struct Sarsa {
    alpha: f64,
    gamma: f64,
}

impl Sarsa {
    pub fn new(alpha: f64, gamma: f64) -> Self {
        Self { alpha, gamma }
    }
}

impl Default for Sarsa {
    fn default() -> Self {
        Self::new(0.1, 0.9)
    }
}

impl<T: Task, V: ActionValueFunction<T>> Agent<T, V> for Sarsa {
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
            let next_value =
                predict_next_value::<T, V>(value_function, &next_state, &next_action)?;
            let backup_target = reward + self.gamma * next_value;
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
