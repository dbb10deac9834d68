//! Bounded circular experience store with concurrent producers and one
//! consumer. Three parallel arrays behind a single mutex; the lock covers the
//! whole row copy, so a reader never observes a partially written slot.

use std::sync::Mutex;

use rand::Rng;

use kestrel_core::network::TrainBatch;

pub struct ReplayBuffer {
    obs_len: usize,
    policy_len: usize,
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    inputs: Vec<f32>,
    policies: Vec<f32>,
    values: Vec<f32>,
    write_index: usize,
    total: u64,
}

impl ReplayBuffer {
    pub fn new(obs_len: usize, policy_len: usize, capacity: usize) -> Self {
        assert!(capacity > 0);
        ReplayBuffer {
            obs_len,
            policy_len,
            capacity,
            inner: Mutex::new(Inner {
                inputs: vec![0.0; capacity * obs_len],
                policies: vec![0.0; capacity * policy_len],
                values: vec![0.0; capacity],
                write_index: 0,
                total: 0,
            }),
        }
    }

    /// Capacity in rows.
    pub fn len(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Monotonic count of rows ever inserted.
    pub fn count(&self) -> u64 {
        self.inner.lock().unwrap().total
    }

    pub fn add(&self, obs: &[f32], policy: &[f32], value: f32) {
        assert_eq!(obs.len(), self.obs_len);
        assert_eq!(policy.len(), self.policy_len);

        let mut inner = self.inner.lock().unwrap();
        let slot = inner.write_index;

        inner.inputs[slot * self.obs_len..(slot + 1) * self.obs_len].copy_from_slice(obs);
        inner.policies[slot * self.policy_len..(slot + 1) * self.policy_len].copy_from_slice(policy);
        inner.values[slot] = value;

        inner.write_index = (slot + 1) % self.capacity;
        inner.total += 1;
    }

    /// Fill `out` with rows chosen uniformly, with replacement, from the
    /// populated part of the buffer.
    pub fn select_batch(&self, rng: &mut impl Rng, out: &mut TrainBatch) {
        assert_eq!(out.inputs.len(), out.count * self.obs_len);
        assert_eq!(out.policies.len(), out.count * self.policy_len);
        assert_eq!(out.values.len(), out.count);

        let inner = self.inner.lock().unwrap();
        let populated = (inner.total as usize).min(self.capacity);
        assert!(populated > 0, "select_batch on an empty buffer");

        for i in 0..out.count {
            let source = rng.gen_range(0..populated);

            out.inputs[i * self.obs_len..(i + 1) * self.obs_len]
                .copy_from_slice(&inner.inputs[source * self.obs_len..(source + 1) * self.obs_len]);
            out.policies[i * self.policy_len..(i + 1) * self.policy_len].copy_from_slice(
                &inner.policies[source * self.policy_len..(source + 1) * self.policy_len],
            );
            out.values[i] = inner.values[source];
        }
    }

    /// Reset both indices. Memory is not zeroed.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_index = 0;
        inner.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn row(value: f32) -> (Vec<f32>, Vec<f32>) {
        (vec![value; 3], vec![value; 5])
    }

    #[test]
    fn wraps_around_capacity() {
        let buffer = ReplayBuffer::new(3, 5, 4);

        for k in 0..10 {
            let (obs, policy) = row(k as f32);
            buffer.add(&obs, &policy, k as f32);
        }

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.count(), 10);

        // slots now hold 8, 9, 6, 7 (write index wrapped to 2)
        let inner = buffer.inner.lock().unwrap();
        assert_eq!(inner.write_index, 2);
        assert_eq!(inner.values, vec![8.0, 9.0, 6.0, 7.0]);
    }

    #[test]
    fn sampling_covers_all_populated_slots() {
        let buffer = ReplayBuffer::new(3, 5, 4);
        for k in 0..10 {
            let (obs, policy) = row(k as f32);
            buffer.add(&obs, &policy, k as f32);
        }

        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = std::collections::HashSet::new();
        let mut out = TrainBatch::zeroed(1, 3, 5);

        for _ in 0..1000 {
            buffer.select_batch(&mut rng, &mut out);
            seen.insert(out.values[0] as i64);
            // rows stay consistent across the three arrays
            assert_eq!(out.inputs, vec![out.values[0]; 3]);
            assert_eq!(out.policies, vec![out.values[0]; 5]);
        }

        let mut seen: Vec<_> = seen.into_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![6, 7, 8, 9]);
    }

    #[test]
    fn sampling_respects_partial_fill() {
        let buffer = ReplayBuffer::new(3, 5, 4);
        let (obs, policy) = row(42.0);
        buffer.add(&obs, &policy, 42.0);

        let mut rng = StdRng::seed_from_u64(0);
        let mut out = TrainBatch::zeroed(8, 3, 5);
        buffer.select_batch(&mut rng, &mut out);
        assert_eq!(out.values, vec![42.0; 8]);
    }

    #[test]
    fn clear_resets_indices() {
        let buffer = ReplayBuffer::new(3, 5, 4);
        let (obs, policy) = row(1.0);
        buffer.add(&obs, &policy, 1.0);

        buffer.clear();
        assert_eq!(buffer.count(), 0);
        assert!(buffer.is_empty());

        buffer.add(&obs, &policy, 2.0);
        assert_eq!(buffer.inner.lock().unwrap().values[0], 2.0);
    }
}
