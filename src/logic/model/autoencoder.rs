//! Dense Autoencoder - Reconstruction Network
//!
//! W → H → latent → H → W, ReLU inside, sigmoid output so reconstructions
//! stay in [0, 1]. Trained with plain MSE on the input itself; the anomaly
//! label never reaches the loss.
//!
//! Tensors are `ndarray` matrices laid out (batch, features). Backprop and
//! Adam are implemented directly since the topology is fixed.

use ndarray::{Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SentinelError, SentinelResult};

// ============================================================================
// TOPOLOGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: &mut Array2<f32>) {
        match self {
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Sigmoid => x.mapv_inplace(sigmoid),
        }
    }

    /// d(out)/d(pre), expressed through the activated output
    fn derivative(self, out: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => out.mapv(|y| if y > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => out.mapv(|y| y * (1.0 - y)),
        }
    }
}

fn sigmoid(v: f32) -> f32 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub units_in: usize,
    pub units_out: usize,
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub kind: String,
    pub input_width: usize,
    pub latent_dim: usize,
    pub layers: Vec<LayerSpec>,
}

pub const TOPOLOGY_KIND: &str = "dense-autoencoder";

impl NetworkTopology {
    /// Fixed shape for a given input width and bottleneck
    pub fn for_dims(input_width: usize, latent_dim: usize) -> Self {
        let hidden = (input_width / 2).max(latent_dim);
        let layer = |name: &str, units_in, units_out, activation| LayerSpec {
            name: name.to_string(),
            units_in,
            units_out,
            activation,
        };
        Self {
            kind: TOPOLOGY_KIND.to_string(),
            input_width,
            latent_dim,
            layers: vec![
                layer("encoder_hidden", input_width, hidden, Activation::Relu),
                layer("latent", hidden, latent_dim, Activation::Relu),
                layer("decoder_hidden", latent_dim, hidden, Activation::Relu),
                layer("reconstruction", hidden, input_width, Activation::Sigmoid),
            ],
        }
    }

    /// Structural checks applied to topologies read from disk
    pub fn validate(&self) -> SentinelResult<()> {
        let fail = |msg: String| Err(SentinelError::InvalidBundle(msg));

        if self.kind != TOPOLOGY_KIND {
            return fail(format!("unsupported topology kind '{}'", self.kind));
        }
        if self.latent_dim == 0 || self.latent_dim >= self.input_width {
            return fail(format!(
                "latent_dim {} is not a bottleneck for width {}",
                self.latent_dim, self.input_width
            ));
        }
        let (first, last) = match (self.layers.first(), self.layers.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return fail("topology has no layers".to_string()),
        };
        if first.units_in != self.input_width || last.units_out != self.input_width {
            return fail("topology does not map input width back to itself".to_string());
        }
        if last.activation != Activation::Sigmoid {
            return fail("output layer must be sigmoid".to_string());
        }
        for pair in self.layers.windows(2) {
            if pair[0].units_out != pair[1].units_in {
                return fail(format!("layer '{}' does not feed '{}'", pair[0].name, pair[1].name));
            }
        }
        let narrowest = self.layers.iter().map(|l| l.units_out).min().unwrap_or(0);
        if narrowest != self.latent_dim {
            return fail(format!(
                "narrowest layer is {} wide, expected latent_dim {}",
                narrowest, self.latent_dim
            ));
        }
        Ok(())
    }
}

// ============================================================================
// LAYERS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct DenseLayer {
    spec: LayerSpec,
    /// (units_in, units_out)
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero bias
    fn init(spec: LayerSpec, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (spec.units_in + spec.units_out) as f32).sqrt();
        let weights = Array2::from_shape_fn((spec.units_in, spec.units_out), |_| {
            rng.gen_range(-limit..limit)
        });
        let bias = Array1::zeros(spec.units_out);
        Self { spec, weights, bias }
    }

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let mut z = input.dot(&self.weights) + &self.bias;
        self.spec.activation.apply(&mut z);
        z
    }
}

/// Name + shape of one exported tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl WeightSpec {
    fn f32(name: String, shape: Vec<usize>) -> Self {
        Self { name, shape, dtype: "float32".to_string() }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// OPTIMIZER
// ============================================================================

struct Moments {
    m_w: Array2<f32>,
    v_w: Array2<f32>,
    m_b: Array1<f32>,
    v_b: Array1<f32>,
}

/// Adam with the usual defaults (β1 = 0.9, β2 = 0.999, ε = 1e-7)
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    moments: Vec<Moments>,
}

impl Adam {
    pub fn new(learning_rate: f32, network: &Autoencoder) -> Self {
        let moments = network
            .layers
            .iter()
            .map(|l| Moments {
                m_w: Array2::zeros(l.weights.raw_dim()),
                v_w: Array2::zeros(l.weights.raw_dim()),
                m_b: Array1::zeros(l.bias.raw_dim()),
                v_b: Array1::zeros(l.bias.raw_dim()),
            })
            .collect();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments,
        }
    }

    fn apply(&mut self, layers: &mut [DenseLayer], grads: &[(Array2<f32>, Array1<f32>)]) {
        self.step += 1;
        let hp = AdamStep {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            correction1: 1.0 - self.beta1.powi(self.step),
            correction2: 1.0 - self.beta2.powi(self.step),
        };

        for ((layer, mom), (grad_w, grad_b)) in layers.iter_mut().zip(self.moments.iter_mut()).zip(grads) {
            hp.update(&mut layer.weights, &mut mom.m_w, &mut mom.v_w, grad_w);
            hp.update(&mut layer.bias, &mut mom.m_b, &mut mom.v_b, grad_b);
        }
    }
}

#[derive(Clone, Copy)]
struct AdamStep {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    correction1: f32,
    correction2: f32,
}

impl AdamStep {
    fn update<D: Dimension>(
        self,
        param: &mut ndarray::Array<f32, D>,
        m: &mut ndarray::Array<f32, D>,
        v: &mut ndarray::Array<f32, D>,
        grad: &ndarray::Array<f32, D>,
    ) {
        Zip::from(param).and(m).and(v).and(grad).for_each(|p, m, v, &g| {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / self.correction1;
            let v_hat = *v / self.correction2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
        });
    }
}

// ============================================================================
// AUTOENCODER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Autoencoder {
    topology: NetworkTopology,
    layers: Vec<DenseLayer>,
}

impl Autoencoder {
    /// Fresh, untrained network
    pub fn new(input_width: usize, latent_dim: usize, rng: &mut StdRng) -> Self {
        let topology = NetworkTopology::for_dims(input_width, latent_dim);
        let layers = topology
            .layers
            .iter()
            .cloned()
            .map(|spec| DenseLayer::init(spec, rng))
            .collect();
        Self { topology, layers }
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn input_width(&self) -> usize {
        self.topology.input_width
    }

    pub fn latent_dim(&self) -> usize {
        self.topology.latent_dim
    }

    /// Activations of every layer, input included
    fn forward_all(&self, input: &Array2<f32>) -> Vec<Array2<f32>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward(&acts[acts.len() - 1]);
            acts.push(next);
        }
        acts
    }

    /// Reconstruction of a normalized (batch, W) input
    pub fn reconstruct(&self, input: &Array2<f32>) -> Array2<f32> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward(&x))
    }

    /// Per-row mean squared reconstruction error
    pub fn reconstruction_errors(&self, input: &Array2<f32>) -> Vec<f32> {
        if input.nrows() == 0 {
            return Vec::new();
        }
        let diff = self.reconstruct(input) - input;
        diff.mapv(|d| d * d)
            .mean_axis(Axis(1))
            .map(|m| m.to_vec())
            .unwrap_or_default()
    }

    /// One optimizer step on a batch, returns the batch loss (before the step)
    fn train_batch(&mut self, batch: &Array2<f32>, optimizer: &mut Adam) -> f32 {
        let acts = self.forward_all(batch);
        let output = &acts[acts.len() - 1];
        let count = (batch.nrows() * batch.ncols()) as f32;

        let diff = output - batch;
        let loss = diff.mapv(|d| d * d).sum() / count;

        let mut grad = diff * (2.0 / count);
        let mut grads = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate().rev() {
            let delta = &grad * &layer.spec.activation.derivative(&acts[i + 1]);
            let grad_w = acts[i].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            grad = delta.dot(&layer.weights.t());
            grads.push((grad_w, grad_b));
        }
        grads.reverse();

        optimizer.apply(&mut self.layers, &grads);
        loss
    }

    /// One pass over `data` in shuffled mini-batches; returns mean loss
    pub fn train_epoch(
        &mut self,
        data: &Array2<f32>,
        batch_size: usize,
        optimizer: &mut Adam,
        rng: &mut StdRng,
    ) -> f32 {
        let rows = data.nrows();
        if rows == 0 {
            return 0.0;
        }
        let mut indices: Vec<usize> = (0..rows).collect();
        indices.shuffle(rng);

        let mut weighted = 0.0f32;
        for chunk in indices.chunks(batch_size.max(1)) {
            let batch = data.select(Axis(0), chunk);
            weighted += self.train_batch(&batch, optimizer) * chunk.len() as f32;
        }
        weighted / rows as f32
    }

    // ------------------------------------------------------------------------
    // Weight export / import
    // ------------------------------------------------------------------------

    /// Flat weights in manifest order (kernel then bias, per layer)
    pub fn export_weights(&self) -> (Vec<WeightSpec>, Vec<f32>) {
        let mut specs = Vec::with_capacity(self.layers.len() * 2);
        let mut data = Vec::new();
        for layer in &self.layers {
            specs.push(WeightSpec::f32(
                format!("{}/kernel", layer.spec.name),
                vec![layer.spec.units_in, layer.spec.units_out],
            ));
            data.extend(layer.weights.iter().copied());

            specs.push(WeightSpec::f32(
                format!("{}/bias", layer.spec.name),
                vec![layer.spec.units_out],
            ));
            data.extend(layer.bias.iter().copied());
        }
        (specs, data)
    }

    /// Rebuild from a topology + manifest + flat data, validating everything
    pub fn from_weights(topology: NetworkTopology, specs: &[WeightSpec], data: &[f32]) -> SentinelResult<Self> {
        topology.validate()?;

        let expected: Vec<WeightSpec> = topology
            .layers
            .iter()
            .flat_map(|l| {
                [
                    WeightSpec::f32(format!("{}/kernel", l.name), vec![l.units_in, l.units_out]),
                    WeightSpec::f32(format!("{}/bias", l.name), vec![l.units_out]),
                ]
            })
            .collect();
        if specs != expected.as_slice() {
            return Err(SentinelError::InvalidBundle(
                "weight manifest does not match topology".to_string(),
            ));
        }
        let total: usize = expected.iter().map(WeightSpec::len).sum();
        if data.len() != total {
            return Err(SentinelError::InvalidBundle(format!(
                "weights blob holds {} values, manifest needs {}",
                data.len(),
                total
            )));
        }

        let shape_err = |e: ndarray::ShapeError| SentinelError::InvalidBundle(e.to_string());
        let mut offset = 0;
        let mut layers = Vec::with_capacity(topology.layers.len());
        for spec in &topology.layers {
            let kernel_len = spec.units_in * spec.units_out;
            let weights = Array2::from_shape_vec(
                (spec.units_in, spec.units_out),
                data[offset..offset + kernel_len].to_vec(),
            )
            .map_err(shape_err)?;
            offset += kernel_len;

            let bias = Array1::from_vec(data[offset..offset + spec.units_out].to_vec());
            offset += spec.units_out;

            layers.push(DenseLayer { spec: spec.clone(), weights, bias });
        }

        Ok(Self { topology, layers })
    }
}
