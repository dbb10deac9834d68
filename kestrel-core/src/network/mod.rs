//! The model contract between the search core and the neural network.
//!
//! The network itself is an external collaborator; the core only relies on
//! the I/O surface below. Two implementations ship with the engine: a
//! uniform mock and a small trainable linear model.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

pub mod disk;
pub mod linear;
pub mod uniform;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("checkpoint i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a kestrel checkpoint (bad magic)")]
    BadMagic,
    #[error("unknown model kind tag {0}")]
    UnknownKind(u8),
    #[error("checkpoint payload length mismatch: expected {expected}, found {found}")]
    PayloadLen { expected: usize, found: usize },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ModelKind {
    Uniform,
    Linear,
}

/// A batch of replay tuples to train on.
#[derive(Debug, Clone)]
pub struct TrainBatch {
    pub count: usize,
    pub inputs: Vec<f32>,
    pub policies: Vec<f32>,
    pub values: Vec<f32>,
}

impl TrainBatch {
    pub fn zeroed(count: usize, obs_len: usize, policy_len: usize) -> Self {
        TrainBatch {
            count,
            inputs: vec![0.0; count * obs_len],
            policies: vec![0.0; count * policy_len],
            values: vec![0.0; count],
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TrainOptions {
    pub learning_rate: f32,
    pub epochs: usize,
    pub batch_size: usize,
    pub detect_anomaly: bool,
}

/// A policy/value model.
///
/// `infer` takes row-major observation batches and fills a row-stochastic
/// policy of shape `[batch, policy_len]` plus a value in `[-1, 1]` per row.
/// A successful `train` increments the generation.
pub trait Model: Send + Sync {
    fn kind(&self) -> ModelKind;
    fn obs_len(&self) -> usize;
    fn policy_len(&self) -> usize;

    /// Monotonically non-decreasing id of the trained weights.
    fn generation(&self) -> u64;

    fn infer(&self, input: &[f32], batch: usize, policy: &mut [f32], value: &mut [f32]);

    fn train(&mut self, batch: &TrainBatch, opts: &TrainOptions);

    fn save(&self, path: &Path) -> Result<(), ModelError>;

    fn boxed_clone(&self) -> BoxedModel;
}

pub type BoxedModel = Box<dyn Model>;

struct HandleShared {
    inner: RwLock<BoxedModel>,
    /// Mirror of the inner model's generation, readable without the lock.
    generation: AtomicU64,
}

/// Cloneable, thread-safe handle to the in-production model.
///
/// Single-writer / multi-reader: `infer` runs under the read lock and is
/// concurrent with other `infer`s; `load` takes the write lock so promotion
/// is atomic from the readers' perspective.
#[derive(Clone)]
pub struct ModelHandle {
    shared: Arc<HandleShared>,
}

impl ModelHandle {
    pub fn new(model: BoxedModel) -> Self {
        let generation = AtomicU64::new(model.generation());
        ModelHandle {
            shared: Arc::new(HandleShared {
                inner: RwLock::new(model),
                generation,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> ModelKind {
        self.shared.inner.read().unwrap().kind()
    }

    pub fn obs_len(&self) -> usize {
        self.shared.inner.read().unwrap().obs_len()
    }

    pub fn policy_len(&self) -> usize {
        self.shared.inner.read().unwrap().policy_len()
    }

    pub fn infer(&self, input: &[f32], batch: usize, policy: &mut [f32], value: &mut [f32]) {
        self.shared.inner.read().unwrap().infer(input, batch, policy, value)
    }

    /// Deep copy of the current weights and generation, for a trainer.
    pub fn clone_model(&self) -> BoxedModel {
        self.shared.inner.read().unwrap().boxed_clone()
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        self.shared.inner.read().unwrap().save(path)
    }

    /// Replace the in-production weights with the checkpoint at `path`.
    /// On failure the prior weights remain in place.
    pub fn load(&self, path: &Path) -> Result<(), ModelError> {
        let model = disk::load_model(path)?;
        let mut inner = self.shared.inner.write().unwrap();
        self.shared.generation.store(model.generation(), Ordering::Release);
        *inner = model;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::uniform::UniformModel;
    use super::*;

    #[test]
    fn handle_mirrors_generation() {
        let handle = ModelHandle::new(Box::new(UniformModel::new(4, 8)));
        assert_eq!(handle.generation(), 0);

        let mut candidate = handle.clone_model();
        candidate.train(
            &TrainBatch::zeroed(1, 4, 8),
            &TrainOptions {
                learning_rate: 0.0,
                epochs: 1,
                batch_size: 1,
                detect_anomaly: false,
            },
        );
        assert_eq!(candidate.generation(), 1);
        // the handle is unaffected until a promotion
        assert_eq!(handle.generation(), 0);
    }
}
