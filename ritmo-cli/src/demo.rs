//! Synthetic linear regression used by `ritmo run`.
//!
//! Data is drawn from a random "true" linear model plus uniform noise, all
//! from one seeded RNG so runs are reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ritmo_core::{BatchSize, BoxError, LoopDriver, LoopFailure, LoopOutcome, Logs};
use serde::Serialize;

/// Linear model `y = w·x + b`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearModel {
    pub fn zeros(features: usize) -> Self {
        Self {
            weights: vec![0.0; features],
            bias: 0.0,
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.weights.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>() + self.bias
    }

    /// Euclidean distance between parameter vectors, bias included.
    pub fn distance(&self, other: &LinearModel) -> f64 {
        let weights: f64 = self
            .weights
            .iter()
            .zip(&other.weights)
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        (weights + (self.bias - other.bias).powi(2)).sqrt()
    }
}

/// A mini-batch of `(inputs, targets)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl BatchSize for Batch {
    fn batch_size(&self) -> u64 {
        self.targets.len() as u64
    }
}

/// Generated train/validation split and the model that produced it.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub truth: LinearModel,
    pub train: Vec<Batch>,
    pub valid: Vec<Batch>,
}

#[derive(Debug, Clone)]
pub struct DataSpec {
    pub features: usize,
    pub train_samples: usize,
    pub valid_batches: usize,
    pub batch_size: usize,
    pub noise: f64,
    pub seed: u64,
}

impl SyntheticData {
    pub fn generate(spec: &DataSpec) -> Self {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let truth = LinearModel {
            weights: (0..spec.features).map(|_| rng.gen_range(-2.0..2.0)).collect(),
            bias: rng.gen_range(-1.0..1.0),
        };
        let batch_size = spec.batch_size.max(1);
        let mut sample = |rng: &mut StdRng| {
            let x: Vec<f64> = (0..spec.features).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let noise = if spec.noise > 0.0 {
                rng.gen_range(-spec.noise..spec.noise)
            } else {
                0.0
            };
            let y = truth.predict(&x) + noise;
            (x, y)
        };

        let mut train = Vec::new();
        let mut remaining = spec.train_samples;
        while remaining > 0 {
            let n = remaining.min(batch_size);
            train.push(draw_batch(&mut rng, n, &mut sample));
            remaining -= n;
        }
        let valid = (0..spec.valid_batches)
            .map(|_| draw_batch(&mut rng, batch_size, &mut sample))
            .collect();

        Self {
            truth,
            train,
            valid,
        }
    }
}

fn draw_batch(
    rng: &mut StdRng,
    n: usize,
    sample: &mut impl FnMut(&mut StdRng) -> (Vec<f64>, f64),
) -> Batch {
    let (inputs, targets) = (0..n).map(|_| sample(rng)).unzip();
    Batch { inputs, targets }
}

fn mse(model: &LinearModel, batch: &Batch) -> f64 {
    let n = batch.targets.len().max(1) as f64;
    batch
        .inputs
        .iter()
        .zip(&batch.targets)
        .map(|(x, y)| (model.predict(x) - y).powi(2))
        .sum::<f64>()
        / n
}

/// One SGD step on mean squared error.
pub fn sgd_step(
    learning_rate: f64,
) -> impl FnMut(&LinearModel, &&Batch) -> Result<(Logs, LinearModel), BoxError> {
    move |model: &LinearModel, batch: &&Batch| {
        let n = batch.targets.len().max(1) as f64;
        let mut grad_w = vec![0.0; model.weights.len()];
        let mut grad_b = 0.0;
        for (x, y) in batch.inputs.iter().zip(&batch.targets) {
            let err = model.predict(x) - y;
            for (g, xi) in grad_w.iter_mut().zip(x) {
                *g += 2.0 * err * xi / n;
            }
            grad_b += 2.0 * err / n;
        }
        let loss = mse(model, batch);
        if !loss.is_finite() {
            return Err(format!("training loss diverged to {loss}").into());
        }

        let mut logs = Logs::new();
        logs.add_loss("loss", loss);
        let updated = LinearModel {
            weights: model
                .weights
                .iter()
                .zip(&grad_w)
                .map(|(w, g)| w - learning_rate * g)
                .collect(),
            bias: model.bias - learning_rate * grad_b,
        };
        Ok((logs, updated))
    }
}

/// Full pass over `valid`; the last commit carries running MSE and MAE.
pub fn evaluate(
    model: &LinearModel,
    valid: &[Batch],
) -> Result<LoopOutcome<LinearModel>, LoopFailure> {
    let mut squared = 0.0;
    let mut absolute = 0.0;
    let mut seen = 0usize;
    let mut driver: LoopDriver<'_, LinearModel, &Batch> =
        LoopDriver::new().step(move |model: &LinearModel, batch: &&Batch| {
            for (x, y) in batch.inputs.iter().zip(&batch.targets) {
                let err = model.predict(x) - y;
                squared += err * err;
                absolute += err.abs();
            }
            seen += batch.targets.len();
            let n = seen.max(1) as f64;
            let mut logs = Logs::new();
            logs.add_stateful_loss("loss", squared / n);
            logs.add_stateful_metric("mae", absolute / n);
            Ok((logs, model.clone()))
        });
    driver.run(model.clone(), valid.iter())
}
