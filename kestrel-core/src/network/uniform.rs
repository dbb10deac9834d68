use std::path::Path;

use crate::network::{disk, BoxedModel, Model, ModelError, ModelKind, TrainBatch, TrainOptions};

/// Mock model: uniform policy, zero value. `train` only bumps the generation.
#[derive(Debug, Clone)]
pub struct UniformModel {
    obs_len: usize,
    policy_len: usize,
    generation: u64,
}

impl UniformModel {
    pub fn new(obs_len: usize, policy_len: usize) -> Self {
        Self::with_generation(obs_len, policy_len, 0)
    }

    pub fn with_generation(obs_len: usize, policy_len: usize, generation: u64) -> Self {
        UniformModel {
            obs_len,
            policy_len,
            generation,
        }
    }
}

impl Model for UniformModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Uniform
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
        let p = 1.0 / self.policy_len as f32;
        policy[..batch * self.policy_len].fill(p);
        value[..batch].fill(0.0);
    }

    fn train(&mut self, _batch: &TrainBatch, _opts: &TrainOptions) {
        self.generation += 1;
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        disk::write_checkpoint(
            path,
            ModelKind::Uniform,
            self.generation,
            self.obs_len,
            self.policy_len,
            &[],
        )
    }

    fn boxed_clone(&self) -> BoxedModel {
        Box::new(self.clone())
    }
}
