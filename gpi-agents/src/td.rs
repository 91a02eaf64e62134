//! Shared helpers for the episode loops of the TD family.

use candle_core::Result;
use gpi_core::policy::Policy;
use gpi_core::task::Task;
use gpi_core::value_function::ActionValueFunction;

/// `None` marks that the episode walked into a terminal state, where no
/// action exists to be chosen.
pub(crate) fn choose_action_unless_terminal<T, V, P>(
    task: &T,
    policy: &mut P,
    value_function: &V,
    state: &T::State,
) -> Result<Option<T::Action>>
where
    T: Task,
    V: ActionValueFunction<T>,
    P: Policy<T, V>,
{
    if task.is_terminal_state(state) {
        Ok(None)
    } else {
        policy.choose_action(task, value_function, state).map(Some)
    }
}

/// Terminal states contribute zero future value to backup targets.
pub(crate) fn predict_next_value<T, V>(
    value_function: &V,
    next_state: &T::State,
    next_action: &Option<T::Action>,
) -> Result<f64>
where
    T: Task,
    V: ActionValueFunction<T>,
{
    match next_action {
        Some(action) => value_function.predict_value(next_state, action),
        None => Ok(0.0),
    }
}
