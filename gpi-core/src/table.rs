use bincode::{
    Decode, Encode,
    error::{DecodeError, EncodeError},
};
use std::collections::HashMap;
use std::hash::Hash;

/// Sparse nested map from state to action to some value, with a default for
/// entries that were never written. Backs tabular value functions, visit
/// counters and eligibility traces.
pub struct StateActionTable<S, A, V> {
    entries: HashMap<S, HashMap<A, V>>,
    default: V,
}

impl<S, A, V> StateActionTable<S, A, V>
where
    S: Clone + Eq + Hash,
    A: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(default: V) -> Self {
        Self {
            entries: HashMap::new(),
            default,
        }
    }

    pub fn get(&self, state: &S, action: &A) -> V {
        self.entries
            .get(state)
            .and_then(|actions| actions.get(action))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn set(&mut self, state: S, action: A, value: V) {
        self.entries.entry(state).or_default().insert(action, value);
    }

    /// Drops the entry entirely. Subsequent `get` calls yield the default.
    pub fn remove(&mut self, state: &S, action: &A) {
        if let Some(actions) = self.entries.get_mut(state) {
            actions.remove(action);
            if actions.is_empty() {
                self.entries.remove(state);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S, &A, &V)> {
        self.entries.iter().flat_map(|(state, actions)| {
            actions.iter().map(move |(action, value)| (state, action, value))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|actions| actions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<S, A, V> Clone for StateActionTable<S, A, V>
where
    S: Clone,
    A: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            default: self.default.clone(),
        }
    }
}

impl<S, A, V> Encode for StateActionTable<S, A, V>
where
    S: Encode,
    A: Encode,
    V: Encode,
{
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        self.entries.encode(encoder)?;
        self.default.encode(encoder)
    }
}

impl<C, S, A, V> Decode<C> for StateActionTable<S, A, V>
where
    S: Decode<C> + Eq + Hash,
    A: Decode<C> + Eq + Hash,
    V: Decode<C>,
{
    fn decode<D: bincode::de::Decoder<Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            entries: HashMap::decode(decoder)?,
            default: V::decode(decoder)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_entries_yield_the_default() {
        let mut table: StateActionTable<u32, u32, f64> = StateActionTable::new(0.0);
        assert_eq!(0.0, table.get(&1, &2));
        table.set(1, 2, 3.5);
        assert_eq!(3.5, table.get(&1, &2));
        assert_eq!(0.0, table.get(&1, &3));
    }

    #[test]
    fn remove_prunes_empty_state_entries() {
        let mut table: StateActionTable<u32, u32, f64> = StateActionTable::new(0.0);
        table.set(1, 2, 3.5);
        table.remove(&1, &2);
        assert!(table.is_empty());
        assert_eq!(0.0, table.get(&1, &2));
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut table: StateActionTable<u32, u32, f64> = StateActionTable::new(0.0);
        table.set(1, 2, 3.5);
        table.set(1, 3, -1.0);
        table.set(4, 0, 2.25);
        let bytes = bincode::encode_to_vec(&table, bincode::config::standard()).unwrap();
        let (decoded, _): (StateActionTable<u32, u32, f64>, _) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(3, decoded.len());
        assert_eq!(3.5, decoded.get(&1, &2));
        assert_eq!(-1.0, decoded.get(&1, &3));
        assert_eq!(2.25, decoded.get(&4, &0));
        assert_eq!(0.0, decoded.get(&9, &9));
    }
}
