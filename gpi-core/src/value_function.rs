use crate::table::StateActionTable;
use crate::task::Task;
use crate::utils::{dump_to_file, load_from_file};
use bincode::{Decode, Encode};
use candle_core::{Result, bail};
use std::path::Path;

/// An action value estimate Q(s, a) behind a uniform predict/backup/persist
/// contract, no matter how the values are stored.
///
/// `setup` must be called exactly once before any predict or backup.
/// `save`/`load` must round-trip all learned state so that predictions are
/// identical after a reload.
pub trait ActionValueFunction<T: Task> {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn predict_value(&self, state: &T::State, action: &T::Action) -> Result<f64>;

    /// Moves the estimate of (state, action) toward `backup_target`. What the
    /// target means is up to the algorithm producing it.
    fn backup(
        &mut self,
        state: &T::State,
        action: &T::Action,
        backup_target: f64,
        alpha: f64,
    ) -> Result<()>;

    fn save(&self, _save_dir: &Path) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, _load_dir: &Path) -> Result<()> {
        Ok(())
    }
}

const TABLE_DATA_FILE: &str = "table_action_value_function.bin";

/// Tabular value function over a nested state/action table.
///
/// `backup` applies `Q <- Q + alpha * (target - Q)`. The starting table can be
/// supplied up front for tasks that want non-zero initial estimates.
pub struct TableActionValueFunction<T: Task> {
    initial_table: StateActionTable<T::State, T::Action, f64>,
    table: Option<StateActionTable<T::State, T::Action, f64>>,
}

impl<T: Task> TableActionValueFunction<T> {
    pub fn new() -> Self {
        Self {
            initial_table: StateActionTable::new(0.0),
            table: None,
        }
    }

    pub fn with_initial_table(initial_table: StateActionTable<T::State, T::Action, f64>) -> Self {
        Self {
            initial_table,
            table: None,
        }
    }

    pub fn table(&self) -> Result<&StateActionTable<T::State, T::Action, f64>> {
        match &self.table {
            Some(table) => Ok(table),
            None => {
                bail!("\"setup\" must be called on the table action value function before use")
            }
        }
    }

    fn table_mut(&mut self) -> Result<&mut StateActionTable<T::State, T::Action, f64>> {
        match &mut self.table {
            Some(table) => Ok(table),
            None => {
                bail!("\"setup\" must be called on the table action value function before use")
            }
        }
    }
}

impl<T: Task> Default for TableActionValueFunction<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> ActionValueFunction<T> for TableActionValueFunction<T>
where
    T::State: Encode + Decode<()>,
    T::Action: Encode + Decode<()>,
{
    fn setup(&mut self) -> Result<()> {
        self.table = Some(self.initial_table.clone());
        Ok(())
    }

    fn predict_value(&self, state: &T::State, action: &T::Action) -> Result<f64> {
        Ok(self.table()?.get(state, action))
    }

    fn backup(
        &mut self,
        state: &T::State,
        action: &T::Action,
        backup_target: f64,
        alpha: f64,
    ) -> Result<()> {
        let table = self.table_mut()?;
        let value = table.get(state, action);
        table.set(
            state.clone(),
            action.clone(),
            value + alpha * (backup_target - value),
        );
        Ok(())
    }

    fn save(&self, save_dir: &Path) -> Result<()> {
        dump_to_file(&save_dir.join(TABLE_DATA_FILE), self.table()?)
    }

    fn load(&mut self, load_dir: &Path) -> Result<()> {
        let table = load_from_file(
            &load_dir.join(TABLE_DATA_FILE),
            "TableActionValueFunction",
        )?;
        self.table = Some(table);
        Ok(())
    }
}

/// The predict/train primitives of a function approximation backend. The
/// approximate value function below feeds it features built from state/action
/// pairs and otherwise treats it as opaque.
pub trait Approximator<T: Task> {
    type Features;

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn construct_features(&self, state: &T::State, action: &T::Action) -> Result<Self::Features>;

    fn predict(&self, features: &Self::Features) -> Result<f64>;

    fn train(&mut self, features: &Self::Features, backup_target: f64, alpha: f64) -> Result<()>;

    fn save(&self, _save_dir: &Path) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, _load_dir: &Path) -> Result<()> {
        Ok(())
    }
}

/// Approximate value function: builds features for every state/action pair and
/// delegates prediction and training to the approximator.
pub struct ApproxActionValueFunction<F> {
    approximator: F,
}

impl<F> ApproxActionValueFunction<F> {
    pub fn new(approximator: F) -> Self {
        Self { approximator }
    }

    pub fn approximator(&self) -> &F {
        &self.approximator
    }
}

impl<T: Task, F: Approximator<T>> ActionValueFunction<T> for ApproxActionValueFunction<F> {
    fn setup(&mut self) -> Result<()> {
        self.approximator.setup()
    }

    fn predict_value(&self, state: &T::State, action: &T::Action) -> Result<f64> {
        let features = self.approximator.construct_features(state, action)?;
        self.approximator.predict(&features)
    }

    fn backup(
        &mut self,
        state: &T::State,
        action: &T::Action,
        backup_target: f64,
        alpha: f64,
    ) -> Result<()> {
        let features = self.approximator.construct_features(state, action)?;
        self.approximator.train(&features, backup_target, alpha)
    }

    fn save(&self, save_dir: &Path) -> Result<()> {
        self.approximator.save(save_dir)
    }

    fn load(&mut self, load_dir: &Path) -> Result<()> {
        self.approximator.load(load_dir)
    }
}
