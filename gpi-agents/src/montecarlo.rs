use bincode::{Decode, Encode};
use candle_core::Result;
use gpi_core::gpi::{Agent, generate_episode};
use gpi_core::policy::PolicyKind;
use gpi_core::table::StateActionTable;
use gpi_core::task::{Task, Transition};
use gpi_core::utils::{dump_to_file, load_from_file};
use gpi_core::value_function::ActionValueFunction;
use std::path::Path;

const UPDATE_COUNTER_FILE: &str = "montecarlo_update_counter.bin";

/// Every-visit Monte Carlo policy evaluation.
///
/// Generates a full episode under the behavior policy, then for every visited
/// state/action pair backs up the discounted sum of rewards observed from that
/// visit to the end of the episode. The estimate converges to the running
/// average of those returns: the visit counter `n` kept per pair turns the
/// uniform backup rule into `Q <- Q + 1/(n+1) * (G - Q)`.
pub struct MonteCarlo<T: Task> {
    gamma: f64,
    update_counter: StateActionTable<T::State, T::Action, u64>,
}

impl<T: Task> MonteCarlo<T> {
    /// `gamma` discounts future rewards, `gamma = 1` keeps them undiscounted.
    pub fn new(gamma: f64) -> Self {
        Self {
            gamma,
            update_counter: StateActionTable::new(0),
        }
    }

    pub fn update_count(&self, state: &T::State, action: &T::Action) -> u64 {
        self.update_counter.get(state, action)
    }

    fn discounted_reward_from(&self, start: usize, episode: &[Transition<T>]) -> f64 {
        episode[start..]
            .iter()
            .enumerate()
            .map(|(step, transition)| self.gamma.powi(step as i32) * transition.reward)
            .sum()
    }
}

impl<T: Task> Default for MonteCarlo<T> {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl<T, V> Agent<T, V> for MonteCarlo<T>
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
        let episode = generate_episode(task, policy, &*value_function)?;
        for start in 0..episode.len() {
            let following_reward = self.discounted_reward_from(start, &episode);
            let transition = &episode[start];
            let count = self.update_counter.get(&transition.state, &transition.action);
            value_function.backup(
                &transition.state,
                &transition.action,
                following_reward,
                1.0 / (count as f64 + 1.0),
            )?;
            self.update_counter.set(
                transition.state.clone(),
                transition.action.clone(),
                count + 1,
            );
        }
        Ok(())
    }

    fn save_algorithm_state(&self, save_dir: &Path) -> Result<()> {
        dump_to_file(&save_dir.join(UPDATE_COUNTER_FILE), &self.update_counter)
    }

    fn load_algorithm_state(&mut self, load_dir: &Path) -> Result<()> {
        self.update_counter = load_from_file(
            &load_dir.join(UPDATE_COUNTER_FILE),
            "MonteCarlo update counter",
        )?;
        Ok(())
    }
}
