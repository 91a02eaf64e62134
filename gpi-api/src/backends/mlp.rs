use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Result, Tensor, bail};
use candle_nn::{
    Activation, AdamW, Module, Optimizer, ParamsAdamW, Sequential, VarBuilder, VarMap, linear, seq,
};
use gpi_agents::deep_q_learning::{BackupSample, QNetworkBackend};
use gpi_core::task::Task;
use std::marker::PhantomData;
use std::path::Path;

const Q_NETWORK_FILE: &str = "q_network.safetensors";
const Q_HAT_NETWORK_FILE: &str = "q_hat_network.safetensors";

fn build_mlp(input_dim: usize, layers: &[usize], vb: &VarBuilder, prefix: &str) -> Result<Sequential> {
    let mut last_dim = input_dim;
    let mut network = seq();
    let num_layers = layers.len();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        if layer_idx == num_layers - 1 {
            network = network.add(linear(last_dim, *layer_size, vb.pp(layer_pp))?);
        } else {
            network = network
                .add(linear(last_dim, *layer_size, vb.pp(layer_pp))?)
                .add(Activation::Relu);
        }
        last_dim = *layer_size;
    }
    Ok(network)
}

fn clip_grad(loss: &Tensor, varmap: &VarMap, max_norm: f32) -> Result<GradStore> {
    let mut grad_store = loss.backward()?;
    let all_vars = varmap.all_vars();
    let mut total_norm_squared = 0.0f32;
    let mut var_ids = vec![];
    for var in all_vars.iter() {
        if let Some(grad) = grad_store.get_id(var.id()) {
            var_ids.push(var.id());
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        let clip_coef = max_norm / (total_norm + 1e-6);
        for var in all_vars.iter().filter(|var| var_ids.contains(&var.id())) {
            let Some(grad) = grad_store.get_id(var.id()) else {
                continue;
            };
            let clipped = (grad * clip_coef as f64)?;
            grad_store.insert(var.as_tensor(), clipped);
        }
    }
    Ok(grad_store)
}

/// One Q network: a ReLU multilayer perceptron with its own variables and
/// optimizer state.
pub struct MlpQNetwork {
    varmap: VarMap,
    network: Sequential,
    optimizer: AdamW,
}

/// Candle backed function approximation for `DeepQValueFunction`. The feature
/// function turns a state/action pair into a fixed-size `f32` vector; the
/// backend maps it through a small MLP to one scalar Q value and trains with
/// AdamW on the mean squared error against the backup targets.
pub struct MlpQNetworkBackend<T: Task, F> {
    feature_fn: F,
    input_dim: usize,
    hidden_layers: Vec<usize>,
    learning_rate: f64,
    max_grad_norm: Option<f32>,
    device: Device,
    _task: PhantomData<T>,
}

impl<T, F> MlpQNetworkBackend<T, F>
where
    T: Task,
    F: Fn(&T::State, &T::Action) -> Vec<f32>,
{
    pub fn new(
        feature_fn: F,
        input_dim: usize,
        hidden_layers: &[usize],
        learning_rate: f64,
        max_grad_norm: Option<f32>,
    ) -> Self {
        Self {
            feature_fn,
            input_dim,
            hidden_layers: hidden_layers.to_vec(),
            learning_rate,
            max_grad_norm,
            device: Device::Cpu,
            _task: PhantomData,
        }
    }

    fn build_network(&self) -> Result<MlpQNetwork> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let mut layers = self.hidden_layers.clone();
        layers.push(1);
        let network = build_mlp(self.input_dim, &layers, &vb, "qnet")?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: self.learning_rate,
                ..Default::default()
            },
        )?;
        Ok(MlpQNetwork {
            varmap,
            network,
            optimizer,
        })
    }

    fn features_tensor(&self, rows: &[Vec<f32>]) -> Result<Tensor> {
        let mut flat = Vec::with_capacity(rows.len() * self.input_dim);
        for row in rows {
            if row.len() != self.input_dim {
                bail!(
                    "the feature function produced {} values, the backend expects {}",
                    row.len(),
                    self.input_dim
                );
            }
            flat.extend_from_slice(row);
        }
        Tensor::from_vec(flat, (rows.len(), self.input_dim), &self.device)
    }
}

impl<T, F> QNetworkBackend<T> for MlpQNetworkBackend<T, F>
where
    T: Task,
    F: Fn(&T::State, &T::Action) -> Vec<f32>,
{
    type Network = MlpQNetwork;

    fn initialize_network(&self) -> Result<MlpQNetwork> {
        self.build_network()
    }

    fn clone_weights(&self, source: &MlpQNetwork) -> Result<MlpQNetwork> {
        let target = self.build_network()?;
        {
            let source_vars = source.varmap.data().lock().unwrap();
            let target_vars = target.varmap.data().lock().unwrap();
            for (name, var) in source_vars.iter() {
                let Some(target_var) = target_vars.get(name) else {
                    bail!("variable [ {name} ] is missing while cloning network weights");
                };
                target_var.set(var.as_tensor())?;
            }
        }
        Ok(target)
    }

    fn predict_value(
        &self,
        network: &MlpQNetwork,
        state: &T::State,
        action: &T::Action,
    ) -> Result<f64> {
        let features = self.features_tensor(&[(self.feature_fn)(state, action)])?;
        let prediction = network.network.forward(&features)?;
        let values: Vec<f32> = prediction.flatten_all()?.to_vec1()?;
        Ok(values[0] as f64)
    }

    fn train_on_minibatch(
        &self,
        network: &mut MlpQNetwork,
        minibatch: &[BackupSample<T>],
    ) -> Result<()> {
        if minibatch.is_empty() {
            return Ok(());
        }
        let rows: Vec<Vec<f32>> = minibatch
            .iter()
            .map(|sample| (self.feature_fn)(&sample.state, &sample.action))
            .collect();
        let features = self.features_tensor(&rows)?;
        let targets = Tensor::from_vec(
            minibatch
                .iter()
                .map(|sample| sample.backup_target as f32)
                .collect::<Vec<f32>>(),
            (minibatch.len(), 1),
            &self.device,
        )?;
        let predictions = network.network.forward(&features)?;
        let loss = candle_nn::loss::mse(&predictions, &targets)?;
        let grads = match self.max_grad_norm {
            Some(max_norm) => clip_grad(&loss, &network.varmap, max_norm)?,
            None => loss.backward()?,
        };
        network.optimizer.step(&grads)?;
        Ok(())
    }

    fn save_networks(
        &self,
        q_network: &MlpQNetwork,
        q_hat_network: &MlpQNetwork,
        save_dir: &Path,
    ) -> Result<()> {
        q_network.varmap.save(save_dir.join(Q_NETWORK_FILE))?;
        q_hat_network.varmap.save(save_dir.join(Q_HAT_NETWORK_FILE))?;
        Ok(())
    }

    fn load_networks(&self, load_dir: &Path) -> Result<(MlpQNetwork, MlpQNetwork)> {
        let q_path = load_dir.join(Q_NETWORK_FILE);
        let q_hat_path = load_dir.join(Q_HAT_NETWORK_FILE);
        if !q_path.exists() || !q_hat_path.exists() {
            bail!(
                "The saved networks of \"MlpQNetworkBackend\" are not found on [ {} ]",
                load_dir.display()
            );
        }
        let mut q_network = self.build_network()?;
        q_network.varmap.load(&q_path)?;
        let mut q_hat_network = self.build_network()?;
        q_hat_network.varmap.load(&q_hat_path)?;
        Ok((q_network, q_hat_network))
    }
}
