use crate::callback::{Callback, WatchIterationCount};
use crate::policy::{EpsilonGreedyPolicy, Policy, PolicyKind};
use crate::task::{Task, Transition};
use crate::value_function::ActionValueFunction;
use candle_core::Result;
use std::path::Path;

/// One value function improvement scheme plugged into the GPI loop. The agent
/// decides how an episode updates the value function; the loop supplies
/// everything around it.
pub trait Agent<T: Task, V: ActionValueFunction<T>> {
    /// Called once while the training run is assembled, after the value
    /// function's own setup. Replay warmup and similar one-time work go here.
    fn setup(
        &mut self,
        _task: &T,
        _policy: &mut PolicyKind<T, V>,
        _value_function: &mut V,
    ) -> Result<()> {
        Ok(())
    }

    fn episode_update(
        &mut self,
        task: &T,
        policy: &mut PolicyKind<T, V>,
        value_function: &mut V,
    ) -> Result<()>;

    /// Persists state the algorithm carries across episodes, if any.
    fn save_algorithm_state(&self, _save_dir: &Path) -> Result<()> {
        Ok(())
    }

    fn load_algorithm_state(&mut self, _load_dir: &Path) -> Result<()> {
        Ok(())
    }
}

/// Walks the task from its initial state to a terminal state under `policy`
/// and records every transition.
pub fn generate_episode<T, V, P>(
    task: &T,
    policy: &mut P,
    value_function: &V,
) -> Result<Vec<Transition<T>>>
where
    T: Task,
    V: ActionValueFunction<T>,
    P: Policy<T, V>,
{
    let mut state = task.generate_initial_state();
    let mut episode = Vec::new();
    while !task.is_terminal_state(&state) {
        let action = policy.choose_action(task, value_function, &state)?;
        let next_state = task.transit_state(&state, &action);
        let reward = task.calculate_reward(&next_state);
        episode.push(Transition {
            state: state.clone(),
            action,
            next_state: next_state.clone(),
            reward,
        });
        state = next_state;
    }
    Ok(episode)
}

/// Applies the linear epsilon schedule of an annealing-enabled epsilon greedy
/// policy after every iteration, ahead of the user callbacks.
struct EpsilonAnnealer {
    anneal_finished: bool,
}

impl EpsilonAnnealer {
    fn new() -> Self {
        Self {
            anneal_finished: false,
        }
    }

    fn log(&self, message: &str) {
        println!("[EpsilonGreedyAnnealing] {message}");
    }

    fn log_start(&self, policy: &EpsilonGreedyPolicy) {
        self.log(&format!(
            "Anneal epsilon from {} to {}.",
            policy.eps,
            policy.final_eps()
        ));
    }

    fn after_update(&mut self, policy: &mut EpsilonGreedyPolicy, iteration_count: usize) {
        policy.anneal_eps();
        if !self.anneal_finished && policy.eps == policy.final_eps() {
            self.anneal_finished = true;
            self.log(&format!(
                "Annealing has finished at {iteration_count} iteration."
            ));
        }
    }
}

/// The generalized policy iteration driver. Owns the task, the behavior
/// policy, the value function and the agent, and runs
/// `before_update -> episode update -> after_update -> finish rules` until the
/// first finish rule fires.
pub struct Gpi<T: Task, V: ActionValueFunction<T>, A: Agent<T, V>> {
    pub task: T,
    pub policy: PolicyKind<T, V>,
    pub value_function: V,
    pub agent: A,
}

impl<T: Task, V: ActionValueFunction<T>, A: Agent<T, V>> Gpi<T, V, A> {
    /// Assembles a training run. The value function and the agent are set up
    /// here, so a constructed `Gpi` is always ready to train.
    pub fn new(task: T, mut policy: PolicyKind<T, V>, mut value_function: V, mut agent: A) -> Result<Self> {
        value_function.setup()?;
        agent.setup(&task, &mut policy, &mut value_function)?;
        Ok(Self {
            task,
            policy,
            value_function,
            agent,
        })
    }

    /// Runs GPI until a finish rule fires. A `WatchIterationCount` rule over
    /// `nb_iteration` is always injected ahead of the user callbacks, so the
    /// loop terminates even with an empty callback list. Callbacks run in
    /// registration order.
    pub fn train(
        &mut self,
        nb_iteration: usize,
        mut callbacks: Vec<Box<dyn Callback<T, V>>>,
    ) -> Result<()> {
        let mut default_rule = WatchIterationCount::new(nb_iteration, true);
        let mut annealer = match &self.policy {
            PolicyKind::EpsilonGreedy(policy) if policy.do_annealing => Some(EpsilonAnnealer::new()),
            _ => None,
        };

        default_rule.before_gpi_start(&self.task, &self.value_function)?;
        if let (Some(annealer), PolicyKind::EpsilonGreedy(policy)) = (&annealer, &self.policy) {
            annealer.log_start(policy);
        }
        for callback in callbacks.iter_mut() {
            callback.before_gpi_start(&self.task, &self.value_function)?;
        }

        let mut iteration_count = 1;
        loop {
            default_rule.before_update(iteration_count, &self.task, &self.value_function)?;
            for callback in callbacks.iter_mut() {
                callback.before_update(iteration_count, &self.task, &self.value_function)?;
            }

            self.agent
                .episode_update(&self.task, &mut self.policy, &mut self.value_function)?;

            default_rule.after_update(iteration_count, &self.task, &self.value_function)?;
            if let (Some(annealer), PolicyKind::EpsilonGreedy(policy)) =
                (&mut annealer, &mut self.policy)
            {
                annealer.after_update(policy, iteration_count);
            }
            for callback in callbacks.iter_mut() {
                callback.after_update(iteration_count, &self.task, &self.value_function)?;
            }

            let mut finished =
                default_rule.interrupt_gpi(iteration_count, &self.task, &self.value_function)?;
            if !finished {
                for callback in callbacks.iter_mut() {
                    if callback.interrupt_gpi(iteration_count, &self.task, &self.value_function)? {
                        finished = true;
                        break;
                    }
                }
            }
            if finished {
                default_rule.after_gpi_finish(&self.task, &self.value_function)?;
                for callback in callbacks.iter_mut() {
                    callback.after_gpi_finish(&self.task, &self.value_function)?;
                }
                return Ok(());
            }
            iteration_count += 1;
        }
    }

    /// Saves the value function and the agent's own state under `save_dir`.
    pub fn save(&self, save_dir: &Path) -> Result<()> {
        self.value_function.save(save_dir)?;
        self.agent.save_algorithm_state(save_dir)
    }

    /// Restores everything a matching `save` call wrote.
    pub fn load(&mut self, load_dir: &Path) -> Result<()> {
        self.value_function.load(load_dir)?;
        self.agent.load_algorithm_state(load_dir)
    }
}
