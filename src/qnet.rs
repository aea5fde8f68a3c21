use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::replay::Transition;
use crate::rng::SimRng;

/// Each averaged gradient component is clipped to this magnitude.
pub const GRAD_CLIP: f32 = 5.0;

/// Intermediates of one forward pass, kept for backprop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardPass {
    pub pre_hidden: Vec<f32>,
    pub hidden: Vec<f32>,
    pub q_values: Vec<f32>,
}

// =============================================================================
// Q-Network (dense -> ReLU -> dense)
// =============================================================================

/// Two-layer perceptron with row-major weight storage:
/// `w1[h * input + i]` and `w2[o * hidden + h]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QNetwork {
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
}

fn init_layer(rows: usize, cols: usize, rng: &mut SimRng) -> Vec<f32> {
    let scale = (2.0 / (rows + cols) as f64).sqrt();
    (0..rows * cols)
        .map(|_| rng.range(-scale, scale) as f32)
        .collect()
}

fn check(tensor: &'static str, values: &[f32], expected: usize) -> Result<(), SnapshotError> {
    if values.len() != expected {
        return Err(SnapshotError::Shape {
            tensor,
            expected,
            found: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SnapshotError::NonFinite(tensor));
    }
    Ok(())
}

impl QNetwork {
    /// Fresh network; weights uniform in `±sqrt(2 / (fan_in + fan_out))`,
    /// biases zero.
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        rng: &mut SimRng,
    ) -> Self {
        let w1 = init_layer(hidden_size, input_size, rng);
        let w2 = init_layer(output_size, hidden_size, rng);
        Self {
            input_size,
            hidden_size,
            output_size,
            w1,
            b1: vec![0.0; hidden_size],
            w2,
            b2: vec![0.0; output_size],
        }
    }

    /// Build from explicit parameters, rejecting wrong lengths and
    /// non-finite values.
    pub fn from_parts(
        (input_size, hidden_size, output_size): (usize, usize, usize),
        w1: Vec<f32>,
        b1: Vec<f32>,
        w2: Vec<f32>,
        b2: Vec<f32>,
    ) -> Result<Self, SnapshotError> {
        let net = Self {
            input_size,
            hidden_size,
            output_size,
            w1,
            b1,
            w2,
            b2,
        };
        net.validate()?;
        Ok(net)
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        check("w1", &self.w1, self.hidden_size * self.input_size)?;
        check("b1", &self.b1, self.hidden_size)?;
        check("w2", &self.w2, self.output_size * self.hidden_size)?;
        check("b2", &self.b2, self.output_size)?;
        Ok(())
    }

    pub fn topology(&self) -> (usize, usize, usize) {
        (self.input_size, self.hidden_size, self.output_size)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn w1(&self) -> &[f32] {
        &self.w1
    }

    pub fn b1(&self) -> &[f32] {
        &self.b1
    }

    pub fn w2(&self) -> &[f32] {
        &self.w2
    }

    pub fn b2(&self) -> &[f32] {
        &self.b2
    }

    /// Hard sync: copy every parameter of `other` into this network's own
    /// storage.
    pub fn copy_from(&mut self, other: &QNetwork) {
        self.input_size = other.input_size;
        self.hidden_size = other.hidden_size;
        self.output_size = other.output_size;
        self.w1.clone_from(&other.w1);
        self.b1.clone_from(&other.b1);
        self.w2.clone_from(&other.w2);
        self.b2.clone_from(&other.b2);
    }

    pub fn forward(&self, observation: &[f32]) -> ForwardPass {
        let mut pre_hidden = vec![0.0f32; self.hidden_size];
        let mut hidden = vec![0.0f32; self.hidden_size];
        for (h, row) in self.w1.chunks_exact(self.input_size.max(1)).enumerate() {
            let sum = self.b1[h]
                + row
                    .iter()
                    .zip(observation)
                    .map(|(w, x)| w * x)
                    .sum::<f32>();
            pre_hidden[h] = sum;
            hidden[h] = sum.max(0.0);
        }

        let mut q_values = vec![0.0f32; self.output_size];
        for (o, row) in self.w2.chunks_exact(self.hidden_size.max(1)).enumerate() {
            q_values[o] = self.b2[o] + row.iter().zip(&hidden).map(|(w, a)| w * a).sum::<f32>();
        }

        ForwardPass {
            pre_hidden,
            hidden,
            q_values,
        }
    }

    pub fn predict(&self, observation: &[f32]) -> Vec<f32> {
        self.forward(observation).q_values
    }

    /// One SGD step on the mean squared TD error of `batch`.
    ///
    /// Targets come from `target`: `r` for terminal transitions, otherwise
    /// `r + gamma * max_a target(s')[a]`. Only the taken action's output
    /// receives gradient. Samples with an out-of-range action, mis-sized
    /// observations or a non-finite error are skipped. Returns the mean loss,
    /// or `None` (with the weights untouched) when no sample contributed.
    pub fn train_batch(
        &mut self,
        batch: &[&Transition],
        target: &QNetwork,
        gamma: f32,
        learning_rate: f32,
    ) -> Option<f32> {
        if batch.is_empty() {
            return None;
        }
        let (n_in, n_hid, n_out) = self.topology();

        let mut grad_w1 = vec![0.0f32; n_hid * n_in];
        let mut grad_b1 = vec![0.0f32; n_hid];
        let mut grad_w2 = vec![0.0f32; n_out * n_hid];
        let mut grad_b2 = vec![0.0f32; n_out];
        let mut loss = 0.0f32;
        let mut used = 0usize;

        for sample in batch {
            let a = sample.action;
            if a >= n_out || sample.state.len() != n_in || sample.next_state.len() != n_in {
                continue;
            }
            let pass = self.forward(&sample.state);
            let current_q = pass.q_values[a];

            let td_target = if sample.done {
                sample.reward
            } else {
                let max_next = target
                    .predict(&sample.next_state)
                    .into_iter()
                    .reduce(f32::max)
                    .unwrap_or(0.0);
                sample.reward + gamma * max_next
            };

            let error = current_q - td_target;
            if !error.is_finite() {
                continue;
            }
            loss += 0.5 * error * error;
            used += 1;

            grad_b2[a] += error;
            let w2_row = &self.w2[a * n_hid..(a + 1) * n_hid];
            let gw2_row = &mut grad_w2[a * n_hid..(a + 1) * n_hid];
            for (g, act) in gw2_row.iter_mut().zip(&pass.hidden) {
                *g += error * act;
            }

            for h in 0..n_hid {
                if pass.pre_hidden[h] <= 0.0 {
                    continue;
                }
                let hidden_grad = w2_row[h] * error;
                grad_b1[h] += hidden_grad;
                let gw1_row = &mut grad_w1[h * n_in..(h + 1) * n_in];
                for (g, x) in gw1_row.iter_mut().zip(&sample.state) {
                    *g += hidden_grad * x;
                }
            }
        }

        if used == 0 {
            return None;
        }

        let inv_batch = 1.0 / batch.len() as f32;
        let sgd = |params: &mut [f32], grads: &[f32]| {
            for (p, g) in params.iter_mut().zip(grads) {
                *p -= learning_rate * (g * inv_batch).clamp(-GRAD_CLIP, GRAD_CLIP);
            }
        };
        sgd(&mut self.w1, &grad_w1);
        sgd(&mut self.b1, &grad_b1);
        sgd(&mut self.w2, &grad_w2);
        sgd(&mut self.b2, &grad_b2);

        Some(loss * inv_batch)
    }
}
