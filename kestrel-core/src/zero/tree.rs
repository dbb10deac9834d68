use std::collections::VecDeque;
use std::ops::Index;

use decorum::N32;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Gamma;
use thiserror::Error;

use crate::env::Env;
use crate::zero::node::{Children, Node};

/// Search behavior knobs, typically derived from the configuration surface.
#[derive(Debug, Copy, Clone)]
pub struct SearchParams {
    pub cpuct: f32,
    /// Jump to an unvisited child unconditionally instead of scoring it.
    pub force_expand_unvisited: bool,
    /// Default Q assumed for unvisited children during selection.
    pub unvisited_value: f32,
    /// Blend weight of the heuristic bootstrap value at expansion, in `[0, 1]`.
    pub bootstrap_weight: f32,
    pub bootstrap_window: f32,
    /// Amplitude applied to the bootstrap term; negative inverts the sign.
    pub bootstrap_amp: f32,
    /// Divide `cpuct` by the number of children of the node under selection.
    pub scale_cpuct_by_actions: bool,
    pub noise_alpha: f32,
    pub noise_weight: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            cpuct: 1.0,
            force_expand_unvisited: false,
            unvisited_value: 1.0,
            bootstrap_weight: 0.0,
            bootstrap_window: 1600.0,
            bootstrap_amp: 0.75,
            scale_cpuct_by_actions: false,
            noise_alpha: 0.3,
            noise_weight: 0.05,
        }
    }
}

#[derive(Debug, Error)]
#[error("no root child for action {action}")]
pub struct NoChildForAction {
    pub action: usize,
}

/// A single search tree: an owned environment plus a node arena.
///
/// After [SearchTree::select] returns `true` the environment sits at the leaf
/// state and an expansion is pending; [SearchTree::expand] must be the next
/// tree operation and restores the environment to the root.
pub struct SearchTree<E: Env> {
    env: E,
    nodes: Vec<Node>,
    target: Option<usize>,
    params: SearchParams,
    rng: StdRng,
}

impl<E: Env> SearchTree<E> {
    pub fn new(params: SearchParams) -> Self {
        Self::from_env(E::default(), params)
    }

    pub fn from_env(env: E, params: SearchParams) -> Self {
        Self::from_env_with_rng(env, params, StdRng::from_entropy())
    }

    pub fn from_env_with_rng(env: E, params: SearchParams, rng: StdRng) -> Self {
        let root = Node::root(-env.turn());
        SearchTree {
            env,
            nodes: vec![root],
            target: None,
            params,
            rng,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_visits(&self) -> u64 {
        self.nodes[0].visits
    }

    pub fn root_children(&self) -> Option<Children> {
        self.nodes[0].children
    }

    /// Descend from the root by PUCT until reaching a leaf.
    ///
    /// Terminal leaves backpropagate their value immediately and yield
    /// `false`, leaving the tree ready for the next `select`. Unexpanded
    /// leaves write their observation into `obs` and yield `true`; the
    /// caller must follow up with [SearchTree::expand].
    pub fn select(&mut self, obs: &mut [f32]) -> bool {
        debug_assert!(self.target.is_none(), "select called with an expansion pending");

        let mut curr = 0;
        loop {
            match self.nodes[curr].children {
                None => {
                    if let Some(term) = self.env.terminal() {
                        self.backprop(curr, term.value);
                        self.rewind(curr);
                        return false;
                    }

                    self.env.observe(obs);
                    self.target = Some(curr);
                    return true;
                }
                Some(children) => {
                    let next = self.select_child(curr, children);
                    let action = self.nodes[next].action.unwrap();
                    self.env.push(action);
                    curr = next;
                }
            }
        }
    }

    fn select_child(&self, parent: usize, children: Children) -> usize {
        if self.params.force_expand_unvisited {
            if let Some(unvisited) = children.iter().find(|&c| self.nodes[c].visits == 0) {
                return unvisited;
            }
        }

        let cpuct_eff = if self.params.scale_cpuct_by_actions {
            self.params.cpuct / children.len() as f32
        } else {
            self.params.cpuct
        };
        let parent_visits = self.nodes[parent].visits;

        let mut best = None;
        let mut best_uct = N32::from_inner(f32::NEG_INFINITY);
        for child in children {
            let uct = self.nodes[child].uct(parent_visits, cpuct_eff, self.params.unvisited_value);
            let uct = N32::from_inner(uct);
            if best.is_none() || uct > best_uct {
                best = Some(child);
                best_uct = uct;
            }
        }
        best.expect("children range is never empty")
    }

    /// Apply a network evaluation to the pending leaf: renormalize the policy
    /// over the legal actions, blend in Dirichlet noise, create the children
    /// and backpropagate the (optionally bootstrapped) value.
    pub fn expand(&mut self, policy: &[f32], value: f32, disable_bootstrap: bool) {
        let target = self.target.take().expect("expand called without a pending selection");
        assert_eq!(policy.len(), self.env.policy_len());

        let actions = self.env.actions().to_vec();
        assert!(!actions.is_empty(), "expand called in a position with no legal actions");

        let mut total = 0.0;
        for &action in &actions {
            let p = policy[action];
            assert!(
                p.is_finite() && p >= 0.0,
                "invalid policy entry {} for action {}",
                p,
                action
            );
            total += p;
        }
        assert!(total > 0.0, "no policy mass on legal actions");

        let noise_weight = self.params.noise_weight;
        let mut noise = vec![0.0; actions.len()];
        if noise_weight > 0.0 {
            dirichlet_noise(&mut self.rng, self.params.noise_alpha, &mut noise);
        }

        let start = self.nodes.len();
        let child_turn = -self.nodes[target].turn;
        for (i, &action) in actions.iter().enumerate() {
            let prior = (1.0 - noise_weight) * policy[action] / total + noise_weight * noise[i];
            self.nodes.push(Node::child(target, action, prior, child_turn));
        }
        self.nodes[target].children = Some(Children::new(start, self.nodes.len()));

        // both the network value and the heuristic are taken in the
        // action-maker's point of view
        let pov = self.nodes[target].turn;
        let mut effective = value * pov;
        if !disable_bootstrap && self.params.bootstrap_weight > 0.0 {
            let heuristic = self.env.bootstrap_value(self.params.bootstrap_window) * pov;
            effective = (1.0 - self.params.bootstrap_weight) * effective
                + self.params.bootstrap_weight * heuristic * self.params.bootstrap_amp;
        }

        self.backprop(target, effective);
        self.rewind(target);
    }

    fn backprop(&mut self, from: usize, value: f32) {
        let mut curr = Some(from);
        while let Some(index) = curr {
            let node = &mut self.nodes[index];
            node.visits += 1;
            node.value_sum += 0.5 + (value * node.turn) / 2.0;
            curr = node.parent;
        }
    }

    /// Pop the environment back to the root state.
    fn rewind(&mut self, from: usize) {
        let mut curr = from;
        while let Some(parent) = self.nodes[curr].parent {
            self.env.pop();
            curr = parent;
        }
    }

    /// Commit `action` at the root: the matching child becomes the new root
    /// (its subtree is copied into a fresh arena, everything else is dropped)
    /// and the environment advances.
    pub fn push(&mut self, action: usize) -> Result<(), NoChildForAction> {
        debug_assert!(self.target.is_none(), "root commit with an expansion pending");

        let children = self.nodes[0].children.ok_or(NoChildForAction { action })?;
        let keep = children
            .iter()
            .find(|&c| self.nodes[c].action == Some(action))
            .ok_or(NoChildForAction { action })?;

        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut root = self.nodes[keep].clone();
        root.parent = None;
        root.action = None;
        nodes.push(root);

        let mut queue = VecDeque::new();
        queue.push_back((keep, 0));
        while let Some((old_index, new_index)) = queue.pop_front() {
            if let Some(children) = self.nodes[old_index].children {
                let start = nodes.len();
                for old_child in children {
                    let mut child = self.nodes[old_child].clone();
                    child.parent = Some(new_index);
                    queue.push_back((old_child, nodes.len()));
                    nodes.push(child);
                }
                nodes[new_index].children = Some(Children::new(start, nodes.len()));
            }
        }

        self.nodes = nodes;
        self.env.push(action);
        Ok(())
    }

    /// Choose an action at the root.
    ///
    /// `alpha < 0.1` picks the most-visited child; otherwise children are
    /// sampled proportionally to `visits^(1/alpha)`.
    pub fn pick(&mut self, alpha: f32) -> usize {
        let children = self.nodes[0].children.expect("no children to pick from");

        if alpha < 0.1 {
            let mut best = None;
            let mut best_visits = 0;
            for child in children {
                let visits = self.nodes[child].visits;
                if best.is_none() || visits > best_visits {
                    best = Some(child);
                    best_visits = visits;
                }
            }
            return self.nodes[best.unwrap()].action.unwrap();
        }

        let weights: Vec<f64> = children
            .iter()
            .map(|c| (self.nodes[c].visits as f64).powf(1.0 / alpha as f64))
            .collect();
        let distr = WeightedIndex::new(&weights).expect("root children carry no visits");
        let picked = children.get(distr.sample(&mut self.rng));
        self.nodes[picked].action.unwrap()
    }

    /// Write the root visit proportions into `dst`, a training policy target.
    pub fn snapshot(&self, dst: &mut [f32]) {
        assert_eq!(dst.len(), self.env.policy_len());
        dst.fill(0.0);

        if let Some(children) = self.nodes[0].children {
            let denom = (self.nodes[0].visits - 1) as f32;
            for child in children {
                let node = &self.nodes[child];
                dst[node.action.unwrap()] = node.visits as f32 / denom;
            }
        }
    }

    /// Drop the whole tree and start over from the initial position.
    pub fn reset(&mut self) {
        self.env = E::default();
        let root = Node::root(-self.env.turn());
        self.nodes.clear();
        self.nodes.push(root);
        self.target = None;
    }
}

impl<E: Env> Index<usize> for SearchTree<E> {
    type Output = Node;

    fn index(&self, index: usize) -> &Node {
        &self.nodes[index]
    }
}

/// Dirichlet(α, …, α) noise over the new children, sampled as normalized
/// gamma draws. A very low α can underflow every draw to zero; the noise
/// mass then collapses onto one random child instead of going NaN.
fn dirichlet_noise(rng: &mut StdRng, alpha: f32, out: &mut [f32]) {
    if let Ok(gamma) = Gamma::new(alpha, 1.0) {
        let mut sum = 0.0;
        for v in out.iter_mut() {
            *v = gamma.sample(rng);
            sum += *v;
        }

        if sum > 1e-8 {
            for v in out.iter_mut() {
                *v /= sum;
            }
            return;
        }
    }

    out.fill(0.0);
    out[rng.gen_range(0..out.len())] = 1.0;
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::chess::{ChessEnv, POLICY_SIZE};

    use super::*;

    fn uniform_policy() -> Vec<f32> {
        vec![1.0 / POLICY_SIZE as f32; POLICY_SIZE]
    }

    fn tree_with(params: SearchParams) -> SearchTree<ChessEnv> {
        SearchTree::from_env_with_rng(ChessEnv::default(), params, StdRng::seed_from_u64(17))
    }

    fn drive(tree: &mut SearchTree<ChessEnv>, cycles: usize) {
        let mut obs = vec![0.0; tree.env().obs_len()];
        let policy = uniform_policy();
        for _ in 0..cycles {
            if tree.select(&mut obs) {
                tree.expand(&policy, 0.0, true);
            }
        }
    }

    #[test]
    fn visit_arithmetic() {
        let mut tree = tree_with(SearchParams::default());
        drive(&mut tree, 64);

        assert_eq!(tree.root_visits(), 64);

        let child_visits: u64 = tree
            .root_children()
            .unwrap()
            .iter()
            .map(|c| tree[c].visits)
            .sum();
        assert_eq!(tree.root_visits(), child_visits + 1);
    }

    #[test]
    fn expansion_priors_stay_on_simplex() {
        let params = SearchParams {
            noise_weight: 0.25,
            ..SearchParams::default()
        };
        let mut tree = tree_with(params);
        drive(&mut tree, 1);

        let children = tree.root_children().unwrap();
        let sum: f32 = children.iter().map(|c| tree[c].prior).sum();
        assert!((sum - 1.0).abs() < 1e-5, "priors sum to {}", sum);
        for child in children {
            let prior = tree[child].prior;
            assert!(prior > 0.0 && prior < 1.0, "prior {} out of range", prior);
        }
    }

    #[test]
    fn snapshot_is_normalized() {
        let mut tree = tree_with(SearchParams::default());
        drive(&mut tree, 64);

        let mut dst = vec![0.0; POLICY_SIZE];
        tree.snapshot(&mut dst);

        let sum: f32 = dst.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "snapshot sums to {}", sum);
    }

    #[test]
    fn root_commit_keeps_subtree() {
        let mut tree = tree_with(SearchParams::default());
        drive(&mut tree, 128);

        let action = tree.pick(0.0);
        let children = tree.root_children().unwrap();
        let kept = children
            .iter()
            .find(|&c| tree[c].action == Some(action))
            .unwrap();
        let kept_visits = tree[kept].visits;
        let kept_children = tree[kept].children.map(|c| c.len());

        tree.push(action).unwrap();

        assert_eq!(tree.root_visits(), kept_visits);
        assert_eq!(tree.root_children().map(|c| c.len()), kept_children);
        assert_eq!(tree.env().ply(), 1);
        assert!(tree[0].parent.is_none());
    }

    #[test]
    fn root_commit_rejects_unknown_action() {
        let mut tree = tree_with(SearchParams::default());
        drive(&mut tree, 8);

        // knight b1-a3 in POV coordinates is action 73 + 56; anything
        // unexpanded works here, POLICY_SIZE - 1 is never a legal opening move
        assert!(tree.push(POLICY_SIZE - 1).is_err());
    }

    #[test]
    fn pick_prefers_most_visited() {
        let mut tree = tree_with(SearchParams::default());
        drive(&mut tree, 128);

        let action = tree.pick(0.0);
        let children = tree.root_children().unwrap();
        let max_visits = children.iter().map(|c| tree[c].visits).max().unwrap();
        let picked = children
            .iter()
            .find(|&c| tree[c].action == Some(action))
            .unwrap();
        assert_eq!(tree[picked].visits, max_visits);
    }

    #[test]
    fn terminal_root_backpropagates_without_expanding() {
        let env = ChessEnv::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let mut tree = SearchTree::from_env_with_rng(env, SearchParams::default(), StdRng::seed_from_u64(0));

        let mut obs = vec![0.0; tree.env().obs_len()];
        for _ in 0..5 {
            assert!(!tree.select(&mut obs));
        }
        assert_eq!(tree.root_visits(), 5);
        assert!(tree.root_children().is_none());
    }

    #[test]
    fn noise_stays_on_simplex_for_any_alpha() {
        let mut rng = StdRng::seed_from_u64(5);
        for &alpha in &[0.0f32, 0.01, 0.3, 10.0] {
            let mut out = vec![0.0; 20];
            dirichlet_noise(&mut rng, alpha, &mut out);

            let sum: f32 = out.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "alpha {} sums to {}", alpha, sum);
            assert!(out.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn reset_starts_over() {
        let mut tree = tree_with(SearchParams::default());
        drive(&mut tree, 32);
        let action = tree.pick(0.0);
        tree.push(action).unwrap();

        tree.reset();
        assert_eq!(tree.root_visits(), 0);
        assert_eq!(tree.env().ply(), 0);
        assert_eq!(tree.len(), 1);
    }
}
