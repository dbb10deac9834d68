use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::network::{disk, BoxedModel, Model, ModelError, ModelKind, TrainBatch, TrainOptions};

/// A single affine layer with a softmax policy head and a tanh value head,
/// trained by SGD over shuffled minibatches with the usual cross-entropy +
/// mean-squared-error loss.
///
/// This is a deliberately small stand-in that keeps the training and gating
/// pipeline executable end to end; the convolutional residual tower the
/// engine is meant to drive lives outside this repository behind the same
/// [Model] contract.
#[derive(Debug, Clone)]
pub struct LinearModel {
    obs_len: usize,
    policy_len: usize,
    generation: u64,

    /// `[policy_len, obs_len]`, row-major.
    w_policy: Vec<f32>,
    b_policy: Vec<f32>,
    w_value: Vec<f32>,
    b_value: f32,
}

impl LinearModel {
    pub fn new(obs_len: usize, policy_len: usize) -> Self {
        LinearModel {
            obs_len,
            policy_len,
            generation: 0,
            w_policy: vec![0.0; policy_len * obs_len],
            b_policy: vec![0.0; policy_len],
            w_value: vec![0.0; obs_len],
            b_value: 0.0,
        }
    }

    pub(super) fn from_payload(
        obs_len: usize,
        policy_len: usize,
        generation: u64,
        payload: Vec<f32>,
    ) -> Result<Self, ModelError> {
        let expected = policy_len * obs_len + policy_len + obs_len + 1;
        if payload.len() != expected {
            return Err(ModelError::PayloadLen {
                expected,
                found: payload.len(),
            });
        }

        let mut payload = payload;
        let b_value = payload.pop().unwrap();
        let w_value = payload.split_off(policy_len * obs_len + policy_len);
        let b_policy = payload.split_off(policy_len * obs_len);
        let w_policy = payload;

        Ok(LinearModel {
            obs_len,
            policy_len,
            generation,
            w_policy,
            b_policy,
            w_value,
            b_value,
        })
    }

    fn payload(&self) -> Vec<f32> {
        let mut payload =
            Vec::with_capacity(self.policy_len * self.obs_len + self.policy_len + self.obs_len + 1);
        payload.extend_from_slice(&self.w_policy);
        payload.extend_from_slice(&self.b_policy);
        payload.extend_from_slice(&self.w_value);
        payload.push(self.b_value);
        payload
    }

    /// Indices of the non-zero observation entries; observations are sparse
    /// bit planes, so weight updates only touch these columns.
    fn support(input: &[f32]) -> Vec<usize> {
        input
            .iter()
            .enumerate()
            .filter(|(_, &x)| x != 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    fn forward(&self, input: &[f32], support: &[usize], policy: &mut [f32]) -> f32 {
        debug_assert_eq!(input.len(), self.obs_len);
        debug_assert_eq!(policy.len(), self.policy_len);

        for (j, out) in policy.iter_mut().enumerate() {
            let row = &self.w_policy[j * self.obs_len..(j + 1) * self.obs_len];
            let mut logit = self.b_policy[j];
            for &i in support {
                logit += row[i] * input[i];
            }
            *out = logit;
        }
        softmax_in_place(policy);

        let mut z = self.b_value;
        for &i in support {
            z += self.w_value[i] * input[i];
        }
        z.tanh()
    }
}

fn softmax_in_place(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in logits.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in logits.iter_mut() {
        *v /= sum;
    }
}

impl Model for LinearModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Linear
    }

    fn obs_len(&self) -> usize {
        self.obs_len
    }

    fn policy_len(&self) -> usize {
        self.policy_len
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn infer(&self, input: &[f32], batch: usize, policy: &mut [f32], value: &mut [f32]) {
        assert!(input.len() >= batch * self.obs_len);
        assert!(policy.len() >= batch * self.policy_len);
        assert!(value.len() >= batch);

        for b in 0..batch {
            let row = &input[b * self.obs_len..(b + 1) * self.obs_len];
            let support = Self::support(row);
            value[b] = self.forward(
                row,
                &support,
                &mut policy[b * self.policy_len..(b + 1) * self.policy_len],
            );
        }
    }

    fn train(&mut self, batch: &TrainBatch, opts: &TrainOptions) {
        assert_eq!(batch.inputs.len(), batch.count * self.obs_len);
        assert_eq!(batch.policies.len(), batch.count * self.policy_len);
        assert_eq!(batch.values.len(), batch.count);
        assert!(opts.batch_size > 0 && opts.learning_rate > 0.0);

        let mut rng = StdRng::from_entropy();
        let mut order: Vec<usize> = (0..batch.count).collect();
        let mut probs = vec![0.0; self.policy_len];

        for _ in 0..opts.epochs {
            order.shuffle(&mut rng);

            for chunk in order.chunks(opts.batch_size) {
                let lr = opts.learning_rate / chunk.len() as f32;
                let mut loss = 0.0;

                for &sample in chunk {
                    let input = &batch.inputs[sample * self.obs_len..(sample + 1) * self.obs_len];
                    let target =
                        &batch.policies[sample * self.policy_len..(sample + 1) * self.policy_len];
                    let target_value = batch.values[sample];

                    let support = Self::support(input);
                    let v = self.forward(input, &support, &mut probs);

                    loss += -target
                        .iter()
                        .zip(probs.iter())
                        .map(|(&t, &p)| if t > 0.0 { t * (p + 1e-9).ln() } else { 0.0 })
                        .sum::<f32>()
                        + (v - target_value) * (v - target_value);

                    // policy head: d loss / d logit = p - t
                    for j in 0..self.policy_len {
                        let grad = probs[j] - target[j];
                        if grad == 0.0 {
                            continue;
                        }
                        self.b_policy[j] -= lr * grad;
                        let row = &mut self.w_policy[j * self.obs_len..(j + 1) * self.obs_len];
                        for &i in &support {
                            row[i] -= lr * grad * input[i];
                        }
                    }

                    // value head through the tanh
                    let grad_z = 2.0 * (v - target_value) * (1.0 - v * v);
                    self.b_value -= lr * grad_z;
                    for &i in &support {
                        self.w_value[i] -= lr * grad_z * input[i];
                    }
                }

                if opts.detect_anomaly {
                    assert!(
                        loss.is_finite(),
                        "non-finite training loss {} over a minibatch of {}",
                        loss,
                        chunk.len()
                    );
                }
            }
        }

        self.generation += 1;
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        disk::write_checkpoint(
            path,
            ModelKind::Linear,
            self.generation,
            self.obs_len,
            self.policy_len,
            &self.payload(),
        )
    }

    fn boxed_clone(&self) -> BoxedModel {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::network::disk::load_model;

    use super::*;

    fn options(epochs: usize) -> TrainOptions {
        TrainOptions {
            learning_rate: 0.5,
            epochs,
            batch_size: 4,
            detect_anomaly: true,
        }
    }

    #[test]
    fn fresh_model_is_uniform() {
        let model = LinearModel::new(4, 3);
        let input = [1.0, 0.0, 1.0, 0.0];
        let mut policy = [0.0; 3];
        let mut value = [9.0; 1];

        model.infer(&input, 1, &mut policy, &mut value);
        assert_eq!(value[0], 0.0);
        for p in policy {
            assert!((p - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn training_fits_a_simple_target() {
        let mut model = LinearModel::new(4, 3);

        // one-hot input 0 maps to policy index 2 and a win,
        // one-hot input 1 maps to policy index 0 and a loss
        let batch = TrainBatch {
            count: 2,
            inputs: vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            policies: vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            values: vec![1.0, -1.0],
        };

        model.train(&batch, &options(200));
        assert_eq!(model.generation(), 1);

        let mut policy = [0.0; 3];
        let mut value = [0.0; 1];
        model.infer(&[1.0, 0.0, 0.0, 0.0], 1, &mut policy, &mut value);
        assert!(policy[2] > 0.8, "policy {:?}", policy);
        assert!(value[0] > 0.5, "value {}", value[0]);

        model.infer(&[0.0, 1.0, 0.0, 0.0], 1, &mut policy, &mut value);
        assert!(policy[0] > 0.8, "policy {:?}", policy);
        assert!(value[0] < -0.5, "value {}", value[0]);
    }

    #[test]
    fn checkpoint_roundtrip_preserves_weights() {
        let mut model = LinearModel::new(4, 3);
        let batch = TrainBatch {
            count: 1,
            inputs: vec![1.0, 0.0, 1.0, 0.0],
            policies: vec![0.0, 1.0, 0.0],
            values: vec![0.5],
        };
        model.train(&batch, &options(3));

        let path = std::env::temp_dir().join("kestrel-test-linear.ckpt");
        model.save(&path).unwrap();
        let loaded = load_model(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.kind(), ModelKind::Linear);
        assert_eq!(loaded.generation(), 1);

        let input = [1.0, 0.0, 1.0, 0.0];
        let mut expected_policy = [0.0; 3];
        let mut expected_value = [0.0; 1];
        model.infer(&input, 1, &mut expected_policy, &mut expected_value);

        let mut policy = [0.0; 3];
        let mut value = [0.0; 1];
        loaded.infer(&input, 1, &mut policy, &mut value);

        assert_eq!(policy, expected_policy);
        assert_eq!(value, expected_value);
    }
}
