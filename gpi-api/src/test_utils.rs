//! Small deterministic tasks and policies the test suites drive the
//! algorithms with.

use candle_core::Result;
use gpi_core::policy::Policy;
use gpi_core::task::Task;
use gpi_core::value_function::ActionValueFunction;

/// Counts upward by one: state `s` has the single action `s + 1`, transit adds
/// the action to the state and the reward is the square of the reached state.
/// With the terminal state at 7 an episode is exactly 0 -> 1 -> 3 -> 7.
pub struct ChainTask {
    terminal_state: u32,
}

impl ChainTask {
    pub fn new(terminal_state: u32) -> Self {
        Self { terminal_state }
    }
}

impl Task for ChainTask {
    type State = u32;
    type Action = u32;

    fn generate_initial_state(&self) -> u32 {
        0
    }

    fn is_terminal_state(&self, state: &u32) -> bool {
        *state >= self.terminal_state
    }

    fn transit_state(&self, state: &u32, action: &u32) -> u32 {
        state + action
    }

    fn generate_possible_actions(&self, state: &u32) -> Vec<u32> {
        vec![state + 1]
    }

    fn calculate_reward(&self, state: &u32) -> f64 {
        (*state as f64).powi(2)
    }
}

/// Like `ChainTask` but with two actions per state, `s + 1` and `s + 2`, so a
/// policy actually has something to decide. States at or past 100 are terminal
/// as well, which keeps episodes finite when the exact terminal state is
/// stepped over by a random policy.
pub struct BranchingChainTask {
    terminal_state: u32,
}

impl BranchingChainTask {
    pub fn new(terminal_state: u32) -> Self {
        Self { terminal_state }
    }
}

impl Task for BranchingChainTask {
    type State = u32;
    type Action = u32;

    fn generate_initial_state(&self) -> u32 {
        0
    }

    fn is_terminal_state(&self, state: &u32) -> bool {
        *state == self.terminal_state || *state >= 100
    }

    fn transit_state(&self, state: &u32, action: &u32) -> u32 {
        state + action
    }

    fn generate_possible_actions(&self, state: &u32) -> Vec<u32> {
        vec![state + 1, state + 2]
    }

    fn calculate_reward(&self, state: &u32) -> f64 {
        (*state as f64).powi(2)
    }
}

/// The five-state planning task: two branches from the root, terminal rewards
/// C = 0.5, E = 0.1 and F = 1.
///
/// ```text
///        A --5--> F(1)
///        |
///        1
///        v
///        B --2--> C(0.5)
///        |
///        3
///        v
///        D --4--> E(0.1)
/// ```
pub struct TwoBranchTask;

impl Task for TwoBranchTask {
    type State = &'static str;
    type Action = u32;

    fn generate_initial_state(&self) -> &'static str {
        "A"
    }

    fn is_terminal_state(&self, state: &&'static str) -> bool {
        matches!(*state, "C" | "E" | "F")
    }

    fn transit_state(&self, state: &&'static str, action: &u32) -> &'static str {
        match (*state, action) {
            ("A", 1) => "B",
            ("A", 5) => "F",
            ("B", 2) => "C",
            ("B", 3) => "D",
            ("D", 4) => "E",
            _ => unreachable!("illegal transition"),
        }
    }

    fn generate_possible_actions(&self, state: &&'static str) -> Vec<u32> {
        match *state {
            "A" => vec![1, 5],
            "B" => vec![2, 3],
            "D" => vec![4],
            _ => vec![],
        }
    }

    fn calculate_reward(&self, state: &&'static str) -> f64 {
        match *state {
            "C" => 0.5,
            "E" => 0.1,
            "F" => 1.0,
            _ => 0.0,
        }
    }
}

/// Deterministic adversary of the greedy policy: always takes the action with
/// the lowest value, first one on ties.
pub struct NegativePolicy;

impl<T: Task, V: ActionValueFunction<T>> Policy<T, V> for NegativePolicy {
    fn choose_action(
        &mut self,
        task: &T,
        value_function: &V,
        state: &T::State,
    ) -> Result<T::Action> {
        let actions = task.generate_possible_actions(state);
        let mut worst: Option<(T::Action, f64)> = None;
        for action in actions {
            let value = value_function.predict_value(state, &action)?;
            let replace = match &worst {
                Some((_, worst_value)) => value < *worst_value,
                None => true,
            };
            if replace {
                worst = Some((action, value));
            }
        }
        match worst {
            Some((action, _)) => Ok(action),
            None => candle_core::bail!("no possible action to choose from"),
        }
    }
}
