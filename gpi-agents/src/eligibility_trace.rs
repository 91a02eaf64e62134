use bincode::{
    Decode, Encode,
    error::{DecodeError, EncodeError},
};
use gpi_core::table::StateActionTable;
use std::hash::Hash;

/// How a trace entry reacts to a revisit of its state/action pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceUpdateMode {
    /// Increment the entry by one on every visit.
    Accumulating,
    /// Pin the entry back to one on every visit.
    Replacing,
}

/// Decaying per state/action credit assignment weights for the lambda
/// algorithms. Entries default to zero and are dropped once decay pushes them
/// to the discard threshold, so the trace only ever holds pairs that still
/// matter.
pub struct EligibilityTrace<S, A> {
    update_mode: TraceUpdateMode,
    discard_threshold: f64,
    gamma: f64,
    lambda: f64,
    eligibilities: StateActionTable<S, A, f64>,
}

impl<S, A> EligibilityTrace<S, A>
where
    S: Clone + Eq + Hash,
    A: Clone + Eq + Hash,
{
    pub fn new(update_mode: TraceUpdateMode, discard_threshold: f64, gamma: f64, lambda: f64) -> Self {
        Self {
            update_mode,
            discard_threshold,
            gamma,
            lambda,
            eligibilities: StateActionTable::new(0.0),
        }
    }

    pub fn get(&self, state: &S, action: &A) -> f64 {
        self.eligibilities.get(state, action)
    }

    /// Bumps the just-visited pair according to the update mode.
    pub fn update(&mut self, state: &S, action: &A) {
        let new_value = match self.update_mode {
            TraceUpdateMode::Accumulating => self.get(state, action) + 1.0,
            TraceUpdateMode::Replacing => 1.0,
        };
        self.eligibilities.set(state.clone(), action.clone(), new_value);
    }

    /// Multiplies the entry by `gamma * lambda` and prunes it once it is at or
    /// below the discard threshold.
    pub fn decay(&mut self, state: &S, action: &A) {
        let decayed = self.gamma * self.lambda * self.get(state, action);
        if decayed <= self.discard_threshold {
            self.eligibilities.remove(state, action);
        } else {
            self.eligibilities.set(state.clone(), action.clone(), decayed);
        }
    }

    /// Snapshot of every live entry. The lambda algorithms iterate this while
    /// mutating the trace, so it has to be detached from the storage.
    pub fn get_eligibilities(&self) -> Vec<(S, A, f64)> {
        self.eligibilities
            .iter()
            .map(|(state, action, eligibility)| (state.clone(), action.clone(), *eligibility))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.eligibilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eligibilities.is_empty()
    }

    pub fn clear(&mut self) {
        self.eligibilities.clear();
    }
}

impl<S, A> Default for EligibilityTrace<S, A>
where
    S: Clone + Eq + Hash,
    A: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new(TraceUpdateMode::Accumulating, 0.0001, 0.99, 0.9)
    }
}

impl<S: Encode, A: Encode> Encode for EligibilityTrace<S, A> {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        let mode: u8 = match self.update_mode {
            TraceUpdateMode::Accumulating => 0,
            TraceUpdateMode::Replacing => 1,
        };
        mode.encode(encoder)?;
        self.discard_threshold.encode(encoder)?;
        self.gamma.encode(encoder)?;
        self.lambda.encode(encoder)?;
        self.eligibilities.encode(encoder)
    }
}

impl<C, S, A> Decode<C> for EligibilityTrace<S, A>
where
    S: Decode<C> + Eq + Hash,
    A: Decode<C> + Eq + Hash,
{
    fn decode<D: bincode::de::Decoder<Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        let update_mode = match u8::decode(decoder)? {
            0 => TraceUpdateMode::Accumulating,
            1 => TraceUpdateMode::Replacing,
            other => {
                return Err(DecodeError::OtherString(format!(
                    "unknown eligibility trace update mode [ {other} ]"
                )));
            }
        };
        Ok(Self {
            update_mode,
            discard_threshold: f64::decode(decoder)?,
            gamma: f64::decode(decoder)?,
            lambda: f64::decode(decoder)?,
            eligibilities: StateActionTable::decode(decoder)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(update_mode: TraceUpdateMode) -> EligibilityTrace<u32, u32> {
        EligibilityTrace::new(update_mode, 0.0001, 0.99, 0.9)
    }

    #[test]
    fn accumulating_mode_increments_on_revisit() {
        let mut trace = trace(TraceUpdateMode::Accumulating);
        trace.update(&0, &1);
        trace.update(&0, &1);
        assert_eq!(2.0, trace.get(&0, &1));
        assert_eq!(0.0, trace.get(&0, &2));
    }

    #[test]
    fn replacing_mode_pins_at_one() {
        let mut trace = trace(TraceUpdateMode::Replacing);
        trace.update(&0, &1);
        trace.update(&0, &1);
        assert_eq!(1.0, trace.get(&0, &1));
    }

    #[test]
    fn decay_multiplies_by_gamma_lambda() {
        let mut trace = trace(TraceUpdateMode::Accumulating);
        trace.update(&0, &1);
        trace.decay(&0, &1);
        assert!((trace.get(&0, &1) - 0.891).abs() < 1e-12);
    }

    #[test]
    fn decay_prunes_entries_at_the_discard_threshold() {
        let mut trace = EligibilityTrace::new(TraceUpdateMode::Accumulating, 0.5, 0.5, 0.9);
        trace.update(&0, &1);
        trace.decay(&0, &1);
        assert!(trace.is_empty());
        assert_eq!(0.0, trace.get(&0, &1));
    }

    #[test]
    fn clear_drops_every_entry() {
        let mut trace = trace(TraceUpdateMode::Accumulating);
        trace.update(&0, &1);
        trace.update(&2, &3);
        trace.clear();
        assert!(trace.is_empty());
    }

    #[test]
    fn dump_and_load_round_trip_parameters_and_entries() {
        let mut trace: EligibilityTrace<u32, u32> =
            EligibilityTrace::new(TraceUpdateMode::Replacing, 0.001, 0.95, 0.8);
        trace.update(&0, &1);
        trace.update(&2, &3);
        trace.decay(&0, &1);
        let bytes = bincode::encode_to_vec(&trace, bincode::config::standard()).unwrap();
        let (loaded, _): (EligibilityTrace<u32, u32>, _) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(TraceUpdateMode::Replacing, loaded.update_mode);
        assert_eq!(0.001, loaded.discard_threshold);
        assert_eq!(0.95, loaded.gamma);
        assert_eq!(0.8, loaded.lambda);
        assert_eq!(trace.get(&0, &1), loaded.get(&0, &1));
        assert_eq!(1.0, loaded.get(&2, &3));
        assert_eq!(2, loaded.len());
    }
}
