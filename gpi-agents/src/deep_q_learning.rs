use crate::td::{choose_action_unless_terminal, predict_next_value};
use bincode::{
    Decode, Encode,
    error::{DecodeError, EncodeError},
};
use candle_core::{Result, bail};
use gpi_core::gpi::{Agent, generate_episode};
use gpi_core::policy::{EpsilonGreedyPolicy, GreedyPolicy, Policy, PolicyKind};
use gpi_core::task::{Task, Transition};
use gpi_core::utils::{dump_to_file, load_from_file};
use gpi_core::value_function::ActionValueFunction;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::path::Path;

const ALGORITHM_STATE_FILE: &str = "deep_q_learning_state.bin";

/// Bounded FIFO memory of past transitions. Oldest entries are evicted first
/// once the buffer is full. Minibatches are sampled uniformly without
/// replacement within one call.
pub struct ExperienceReplay<T: Task> {
    max_size: usize,
    queue: VecDeque<Transition<T>>,
}

impl<T: Task> ExperienceReplay<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            queue: VecDeque::new(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition<T>> {
        self.queue.iter()
    }

    pub fn store_transition(&mut self, transition: Transition<T>) {
        if self.queue.len() >= self.max_size {
            self.queue.pop_front();
        }
        self.queue.push_back(transition);
    }

    pub fn sample_minibatch(
        &self,
        minibatch_size: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<Transition<T>>> {
        if minibatch_size > self.queue.len() {
            bail!(
                "cannot sample a minibatch of {} from a replay memory holding {} transitions",
                minibatch_size,
                self.queue.len()
            );
        }
        let indices = rand::seq::index::sample(rng, self.queue.len(), minibatch_size);
        Ok(indices.iter().map(|idx| self.queue[idx].clone()).collect())
    }
}

impl<T: Task> Encode for ExperienceReplay<T>
where
    T::State: Encode,
    T::Action: Encode,
{
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        self.max_size.encode(encoder)?;
        self.queue.len().encode(encoder)?;
        for transition in &self.queue {
            transition.encode(encoder)?;
        }
        Ok(())
    }
}

impl<C, T: Task> Decode<C> for ExperienceReplay<T>
where
    T::State: Decode<C>,
    T::Action: Decode<C>,
{
    fn decode<D: bincode::de::Decoder<Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        let max_size = usize::decode(decoder)?;
        let len = usize::decode(decoder)?;
        let mut queue = VecDeque::with_capacity(len);
        for _ in 0..len {
            queue.push_back(Transition::decode(decoder)?);
        }
        Ok(Self { max_size, queue })
    }
}

/// One training example for the online network.
pub struct BackupSample<T: Task> {
    pub state: T::State,
    pub action: T::Action,
    pub backup_target: f64,
}

/// The opaque function approximation backend the deep Q value function calls
/// into. A network is whatever the backend says it is; the value function only
/// ever moves whole networks around through these operations.
pub trait QNetworkBackend<T: Task> {
    type Network;

    fn initialize_network(&self) -> Result<Self::Network>;

    /// Builds a new network carrying the same weights as `source`. Used to
    /// sync the target network with the online one.
    fn clone_weights(&self, source: &Self::Network) -> Result<Self::Network>;

    fn predict_value(
        &self,
        network: &Self::Network,
        state: &T::State,
        action: &T::Action,
    ) -> Result<f64>;

    fn train_on_minibatch(
        &self,
        network: &mut Self::Network,
        minibatch: &[BackupSample<T>],
    ) -> Result<()>;

    fn save_networks(
        &self,
        q_network: &Self::Network,
        q_hat_network: &Self::Network,
        save_dir: &Path,
    ) -> Result<()>;

    fn load_networks(&self, load_dir: &Path) -> Result<(Self::Network, Self::Network)>;
}

/// Action value function holding the online network `Q` and the target
/// network `Q_hat`. A single flag decides which network serves predictions;
/// backup-target computation flips it to the target network and back.
pub struct DeepQValueFunction<T: Task, B: QNetworkBackend<T>> {
    backend: B,
    q_network: Option<B::Network>,
    q_hat_network: Option<B::Network>,
    use_target_network: bool,
}

impl<T: Task, B: QNetworkBackend<T>> DeepQValueFunction<T, B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            q_network: None,
            q_hat_network: None,
            use_target_network: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn q_network(&self) -> Option<&B::Network> {
        self.q_network.as_ref()
    }

    pub fn q_hat_network(&self) -> Option<&B::Network> {
        self.q_hat_network.as_ref()
    }

    /// Switches predictions to the target network (`true`) or the online one
    /// (`false`).
    pub fn use_target_network(&mut self, use_target_network: bool) {
        self.use_target_network = use_target_network;
    }

    /// Copies the online network's weights into the target network.
    pub fn reset_target_network(&mut self) -> Result<()> {
        let Some(q_network) = &self.q_network else {
            bail!("\"setup\" must be called on the deep Q value function before use");
        };
        self.q_hat_network = Some(self.backend.clone_weights(q_network)?);
        Ok(())
    }

    pub fn train_on_minibatch(&mut self, minibatch: &[BackupSample<T>]) -> Result<()> {
        let Some(q_network) = self.q_network.as_mut() else {
            bail!("\"setup\" must be called on the deep Q value function before use");
        };
        self.backend.train_on_minibatch(q_network, minibatch)
    }

    fn active_network(&self) -> Result<&B::Network> {
        let network = if self.use_target_network {
            &self.q_hat_network
        } else {
            &self.q_network
        };
        match network {
            Some(network) => Ok(network),
            None => bail!("\"setup\" must be called on the deep Q value function before use"),
        }
    }
}

impl<T: Task, B: QNetworkBackend<T>> ActionValueFunction<T> for DeepQValueFunction<T, B> {
    fn setup(&mut self) -> Result<()> {
        let q_network = self.backend.initialize_network()?;
        self.q_hat_network = Some(self.backend.clone_weights(&q_network)?);
        self.q_network = Some(q_network);
        self.use_target_network = false;
        Ok(())
    }

    fn predict_value(&self, state: &T::State, action: &T::Action) -> Result<f64> {
        self.backend.predict_value(self.active_network()?, state, action)
    }

    fn backup(
        &mut self,
        _state: &T::State,
        _action: &T::Action,
        _backup_target: f64,
        _alpha: f64,
    ) -> Result<()> {
        bail!(
            "the deep Q value function is trained through minibatches, \
             it does not support scalar backups; use it with DeepQLearning"
        );
    }

    fn save(&self, save_dir: &Path) -> Result<()> {
        let (Some(q_network), Some(q_hat_network)) = (&self.q_network, &self.q_hat_network) else {
            bail!("\"setup\" must be called on the deep Q value function before use");
        };
        self.backend.save_networks(q_network, q_hat_network, save_dir)
    }

    fn load(&mut self, load_dir: &Path) -> Result<()> {
        let (q_network, q_hat_network) = self.backend.load_networks(load_dir)?;
        self.q_network = Some(q_network);
        self.q_hat_network = Some(q_hat_network);
        Ok(())
    }
}

/// Deep Q-learning with experience replay and a periodically synced target
/// network.
///
/// Setup fills the replay memory with `replay_start_size` transitions under a
/// fully random policy. Every step stores the observed transition, samples a
/// minibatch, computes one backup target per sampled transition through the
/// target network and trains the online network on the batch. Every
/// `sync_interval` steps the target network is reset from the online one.
pub struct DeepQLearning<T: Task> {
    pub gamma: f64,
    pub replay_memory: ExperienceReplay<T>,
    pub sync_interval: usize,
    pub minibatch_size: usize,
    pub replay_start_size: usize,
    pub reset_step_counter: usize,
    greedy_policy: GreedyPolicy,
    rng: StdRng,
}

impl<T: Task> DeepQLearning<T> {
    pub fn new(
        gamma: f64,
        replay_memory_capacity: usize,
        sync_interval: usize,
        minibatch_size: usize,
        replay_start_size: usize,
        mut rng: StdRng,
    ) -> Self {
        let greedy_policy = GreedyPolicy::new(StdRng::from_rng(&mut rng));
        Self {
            gamma,
            replay_memory: ExperienceReplay::new(replay_memory_capacity),
            sync_interval,
            minibatch_size,
            replay_start_size,
            reset_step_counter: 0,
            greedy_policy,
            rng,
        }
    }

    fn generate_backup_minibatch<B: QNetworkBackend<T>>(
        &mut self,
        task: &T,
        value_function: &mut DeepQValueFunction<T, B>,
        minibatch: Vec<Transition<T>>,
    ) -> Result<Vec<BackupSample<T>>> {
        value_function.use_target_network(true);
        let mut backup_minibatch = Vec::with_capacity(minibatch.len());
        for transition in minibatch {
            let greedy_action = choose_action_unless_terminal(
                task,
                &mut self.greedy_policy,
                &*value_function,
                &transition.next_state,
            )?;
            let greedy_value = predict_next_value::<T, DeepQValueFunction<T, B>>(
                value_function,
                &transition.next_state,
                &greedy_action,
            )?;
            backup_minibatch.push(BackupSample {
                state: transition.state,
                action: transition.action,
                backup_target: transition.reward + self.gamma * greedy_value,
            });
        }
        value_function.use_target_network(false);
        Ok(backup_minibatch)
    }
}

impl<T, B> Agent<T, DeepQValueFunction<T, B>> for DeepQLearning<T>
where
    T: Task,
    T::State: Encode + Decode<()>,
    T::Action: Encode + Decode<()>,
    B: QNetworkBackend<T>,
{
    /// Fills the replay memory up to `replay_start_size` by walking episodes
    /// under a fully random policy.
    fn setup(
        &mut self,
        task: &T,
        _policy: &mut PolicyKind<T, DeepQValueFunction<T, B>>,
        value_function: &mut DeepQValueFunction<T, B>,
    ) -> Result<()> {
        let mut random_policy = EpsilonGreedyPolicy::new(1.0, StdRng::from_rng(&mut self.rng));
        'warmup: while self.replay_memory.len() < self.replay_start_size {
            let episode = generate_episode(task, &mut random_policy, &*value_function)?;
            for transition in episode {
                self.replay_memory.store_transition(transition);
                if self.replay_memory.len() >= self.replay_start_size {
                    break 'warmup;
                }
            }
        }
        Ok(())
    }

    fn episode_update(
        &mut self,
        task: &T,
        policy: &mut PolicyKind<T, DeepQValueFunction<T, B>>,
        value_function: &mut DeepQValueFunction<T, B>,
    ) -> Result<()> {
        value_function.use_target_network(false);
        let mut state = task.generate_initial_state();
        while !task.is_terminal_state(&state) {
            let action = policy.choose_action(task, &*value_function, &state)?;
            let next_state = task.transit_state(&state, &action);
            let reward = task.calculate_reward(&next_state);
            self.replay_memory.store_transition(Transition {
                state: state.clone(),
                action,
                next_state: next_state.clone(),
                reward,
            });
            state = next_state;

            let minibatch = self
                .replay_memory
                .sample_minibatch(self.minibatch_size, &mut self.rng)?;
            let backup_minibatch =
                self.generate_backup_minibatch(task, value_function, minibatch)?;
            value_function.train_on_minibatch(&backup_minibatch)?;

            if self.reset_step_counter >= self.sync_interval {
                value_function.reset_target_network()?;
                self.reset_step_counter = 0;
            } else {
                self.reset_step_counter += 1;
            }
        }
        Ok(())
    }

    /// Persists the parameters, the replay memory and the target sync counter
    /// so a reloaded run continues exactly where this one stopped.
    fn save_algorithm_state(&self, save_dir: &Path) -> Result<()> {
        let state = (
            self.gamma,
            &self.replay_memory,
            self.sync_interval,
            self.minibatch_size,
            self.replay_start_size,
            self.reset_step_counter,
        );
        dump_to_file(&save_dir.join(ALGORITHM_STATE_FILE), &state)
    }

    fn load_algorithm_state(&mut self, load_dir: &Path) -> Result<()> {
        let (gamma, replay_memory, sync_interval, minibatch_size, replay_start_size, reset_step_counter): (
            f64,
            ExperienceReplay<T>,
            usize,
            usize,
            usize,
            usize,
        ) = load_from_file(&load_dir.join(ALGORITHM_STATE_FILE), "DeepQLearning")?;
        self.gamma = gamma;
        self.replay_memory = replay_memory;
        self.sync_interval = sync_interval;
        self.minibatch_size = minibatch_size;
        self.replay_start_size = replay_start_size;
        self.reset_step_counter = reset_step_counter;
        Ok(())
    }
}
