//! Batched search worker: drives a batch of independent trees, committing a
//! root move whenever a tree reaches its node quota and batching all pending
//! leaf observations into a single model inference.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info};

use kestrel_core::chess::ChessEnv;
use kestrel_core::env::Env;
use kestrel_core::zero::tree::SearchTree;

use crate::alpha::AlphaSchedule;
use crate::server::{ServerState, StatusCode};

/// Observation + visit-proportion target captured at a root commit, waiting
/// for the game's terminal value.
struct Trajectory {
    observation: Vec<f32>,
    policy: Vec<f32>,
    pov: f32,
}

pub struct Generator {
    id: usize,
    nodes: u64,
    flush_old_trees: bool,
    draw_value: f32,
    alpha: AlphaSchedule,

    trees: Vec<SearchTree<ChessEnv>>,
    trajectories: Vec<Vec<Trajectory>>,
    source_generation: Vec<u64>,

    obs_len: usize,
    policy_len: usize,
    batch: Vec<f32>,
    policy_out: Vec<f32>,
    value_out: Vec<f32>,
    snapshot: Vec<f32>,
}

impl Generator {
    pub fn new(id: usize, state: &ServerState) -> Self {
        let settings = &state.settings;
        let params = settings.search_params();
        let ibatch = settings.selfplay_batch;

        let obs_len = state.model.obs_len();
        let policy_len = state.model.policy_len();
        let generation = state.model.generation();

        Generator {
            id,
            nodes: settings.selfplay_nodes,
            flush_old_trees: settings.flush_old_trees,
            draw_value: settings.draw_value(),
            alpha: AlphaSchedule::from_settings(settings),

            trees: (0..ibatch).map(|_| SearchTree::new(params)).collect(),
            trajectories: (0..ibatch).map(|_| vec![]).collect(),
            source_generation: vec![generation; ibatch],

            obs_len,
            policy_len,
            batch: vec![0.0; ibatch * obs_len],
            policy_out: vec![0.0; ibatch * policy_len],
            value_out: vec![0.0; ibatch],
            snapshot: vec![0.0; policy_len],
        }
    }

    /// Total trajectories captured but not yet labeled by a finished game.
    pub fn partial_count(&self) -> usize {
        self.trajectories.iter().map(Vec::len).sum()
    }

    /// One outer iteration: fill every batch slot with a pending leaf
    /// observation (committing root moves along the way), infer, expand.
    pub fn step(&mut self, state: &ServerState) {
        let ibatch = self.trees.len();

        for i in 0..ibatch {
            loop {
                // replace trees left over from an older generation
                if self.flush_old_trees && self.source_generation[i] < state.model.generation() {
                    self.trees[i].reset();
                    self.trajectories[i].clear();
                    self.source_generation[i] = state.model.generation();
                }

                let tree = &mut self.trees[i];
                let slot = &mut self.batch[i * self.obs_len..(i + 1) * self.obs_len];

                // search up to the node quota, or until the next observation
                while tree.root_visits() < self.nodes && !tree.select(slot) {}

                // not at quota: this slot awaits inference
                if tree.root_visits() < self.nodes {
                    break;
                }

                // quota reached: record the trajectory and commit a root move
                tree.snapshot(&mut self.snapshot);
                let mut observation = vec![0.0; self.obs_len];
                tree.env().observe(&mut observation);
                let pov = -tree.env().turn();
                self.trajectories[i].push(Trajectory {
                    observation,
                    policy: self.snapshot.clone(),
                    pov,
                });

                let alpha = self.alpha.alpha(tree.env().ply());
                let action = tree.pick(alpha);
                tree.push(action).expect("picked action has a root child");

                if let Some(term) = self.trees[i].env_mut().terminal() {
                    self.finish_game(state, i, term.value);
                }

                // go again on the same slot, possibly on a fresh game
            }
        }

        state
            .model
            .infer(&self.batch, ibatch, &mut self.policy_out, &mut self.value_out);

        let policies = self.policy_out.chunks(self.policy_len);
        assert_eq!(policies.len(), self.trees.len(), "one policy row per tree");
        for (tree, (policy, &value)) in self.trees.iter_mut().zip(policies.zip(&self.value_out)) {
            tree.expand(policy, value, false);
        }

        state.partials[self.id].store(self.partial_count(), Ordering::Release);
    }

    /// Label and flush the finished game's trajectories, service a pending
    /// PGN request and reset the tree for the next game.
    fn finish_game(&mut self, state: &ServerState, i: usize, value: f32) {
        if state.wants_pgn.swap(false, Ordering::AcqRel) {
            let pgn = self.trees[i]
                .env_mut()
                .pgn()
                .expect("finished game is terminal");
            *state.ret_pgn.lock().unwrap() = Some(pgn);
        }

        for t in self.trajectories[i].drain(..) {
            let target = if value == 0.0 { self.draw_value } else { t.pov * value };
            state.buffer.add(&t.observation, &t.policy, target);
        }

        self.trees[i].reset();
    }
}

pub fn generator_main(id: usize, state: Arc<ServerState>) {
    info!(worker = id, "starting inference worker");

    let mut generator = Generator::new(id, &state);
    while state.status.code() == StatusCode::Running {
        // a fatal error terminates this worker only
        if catch_unwind(AssertUnwindSafe(|| generator.step(&state))).is_err() {
            error!(worker = id, "inference worker failed");
            state.status.set_message(format!("inference worker {} failed", id));
            break;
        }
    }

    info!(worker = id, "stopping inference worker");
}
