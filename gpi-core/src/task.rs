use bincode::{
    Decode, Encode,
    error::{DecodeError, EncodeError},
};
use std::hash::Hash;

/// A reinforcement learning problem.
///
/// The state and action types are task defined. They double as lookup keys for
/// tabular storage, hence the `Eq + Hash` bounds. `transit_state` must be a
/// pure function of its inputs and every sequence of legal transitions must
/// eventually reach a terminal state, otherwise episode generation never ends.
pub trait Task {
    type State: Clone + Eq + Hash;
    type Action: Clone + Eq + Hash;

    fn generate_initial_state(&self) -> Self::State;

    fn is_terminal_state(&self, state: &Self::State) -> bool;

    fn transit_state(&self, state: &Self::State, action: &Self::Action) -> Self::State;

    /// Legal actions in `state`. Must be non-empty for non-terminal states.
    fn generate_possible_actions(&self, state: &Self::State) -> Vec<Self::Action>;

    fn calculate_reward(&self, state: &Self::State) -> f64;
}

/// A single step of an episode. Immutable once recorded.
pub struct Transition<T: Task> {
    pub state: T::State,
    pub action: T::Action,
    pub next_state: T::State,
    pub reward: f64,
}

impl<T: Task> Clone for Transition<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            action: self.action.clone(),
            next_state: self.next_state.clone(),
            reward: self.reward,
        }
    }
}

impl<T: Task> PartialEq for Transition<T> {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
            && self.action == other.action
            && self.next_state == other.next_state
            && self.reward == other.reward
    }
}

impl<T: Task> Encode for Transition<T>
where
    T::State: Encode,
    T::Action: Encode,
{
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        self.state.encode(encoder)?;
        self.action.encode(encoder)?;
        self.next_state.encode(encoder)?;
        self.reward.encode(encoder)
    }
}

impl<C, T: Task> Decode<C> for Transition<T>
where
    T::State: Decode<C>,
    T::Action: Decode<C>,
{
    fn decode<D: bincode::de::Decoder<Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            state: T::State::decode(decoder)?,
            action: T::Action::decode(decoder)?,
            next_state: T::State::decode(decoder)?,
            reward: f64::decode(decoder)?,
        })
    }
}
