//! Gating match between the in-production model and a freshly trained
//! candidate. The candidate is promoted only if it scores at least the
//! configured percentage over a fixed number of games.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use kestrel_core::chess::ChessEnv;
use kestrel_core::env::Env;
use kestrel_core::network::{BoxedModel, ModelHandle};
use kestrel_core::zero::tree::SearchTree;

use crate::settings::Settings;

/// Score/verdict arithmetic of a match: each game contributes
/// `value * candidate_turn / 2 + 0.5` points (1 for a candidate win, 0.5 for
/// a draw).
#[derive(Debug, Copy, Clone)]
pub struct MatchScore {
    score: f32,
    games: u32,
    total_games: u32,
    target_pct: f32,
}

impl MatchScore {
    pub fn new(total_games: u32, target_pct: f32) -> Self {
        assert!(total_games > 0);
        MatchScore {
            score: 0.0,
            games: 0,
            total_games,
            target_pct,
        }
    }

    pub fn record(&mut self, terminal_value: f32, candidate_turn: f32) {
        self.score += terminal_value * candidate_turn / 2.0 + 0.5;
        self.games += 1;
    }

    pub fn games(&self) -> u32 {
        self.games
    }

    pub fn finished(&self) -> bool {
        self.games >= self.total_games
    }

    /// Candidate score so far as a percentage of played games.
    pub fn percentage(&self) -> f32 {
        if self.games == 0 {
            0.0
        } else {
            self.score * 100.0 / self.games as f32
        }
    }

    fn target_score(&self) -> f32 {
        self.total_games as f32 * self.target_pct / 100.0
    }

    /// A verdict that is already decided regardless of the remaining games:
    /// the whole-match target is reached, or mathematically out of reach.
    pub fn early_verdict(&self) -> Option<bool> {
        if self.score >= self.target_score() {
            Some(true)
        } else if self.score + ((self.total_games - self.games) as f32) < self.target_score() {
            Some(false)
        } else {
            None
        }
    }

    /// Final verdict over the games actually played.
    pub fn verdict(&self) -> bool {
        self.percentage() >= self.target_pct
    }
}

/// Play the gating match. Interleaves `evaluate_batch` concurrent trees;
/// each position is inferred by whichever model owns the side to move, so
/// two separate input batches are built per iteration.
///
/// Expansions run with the bootstrap disabled so the heuristic cannot bias
/// the gate. Aborts with `false` as soon as another trainer promotes past
/// the candidate's generation.
pub fn evaluate(
    current: &ModelHandle,
    candidate: &mut BoxedModel,
    worker_id: usize,
    settings: &Settings,
) -> bool {
    let ebatch = settings.evaluate_batch;
    let enodes = settings.evaluate_nodes;
    let params = settings.eval_search_params();

    let obs_len = candidate.obs_len();
    let policy_len = candidate.policy_len();
    let candidate_generation = candidate.generation();

    let mut rng = StdRng::from_entropy();
    let mut trees: Vec<SearchTree<ChessEnv>> = (0..ebatch).map(|_| SearchTree::new(params)).collect();
    let mut candidate_turn: Vec<f32> = (0..ebatch)
        .map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 })
        .collect();

    let mut score = MatchScore::new(settings.evaluate_games, settings.evaluate_target_pct as f32);

    let mut cur_inputs = vec![0.0; ebatch * obs_len];
    let mut cd_inputs = vec![0.0; ebatch * obs_len];
    let mut cur_targets: Vec<usize> = Vec::with_capacity(ebatch);
    let mut cd_targets: Vec<usize> = Vec::with_capacity(ebatch);

    let mut policy = vec![0.0; ebatch * policy_len];
    let mut value = vec![0.0; ebatch];

    info!(
        worker = worker_id,
        generation = candidate_generation,
        games = settings.evaluate_games,
        "starting evaluation"
    );

    loop {
        // another trainer already promoted past this candidate
        if current.generation() >= candidate_generation {
            info!(worker = worker_id, "evaluation aborted by a concurrent promotion");
            return false;
        }

        cur_targets.clear();
        cd_targets.clear();

        for i in 0..ebatch {
            loop {
                let is_candidate = trees[i].env().turn() == candidate_turn[i];
                let (inputs, targets) = if is_candidate {
                    (&mut cd_inputs, &mut cd_targets)
                } else {
                    (&mut cur_inputs, &mut cur_targets)
                };

                let offset = targets.len();
                let slot = &mut inputs[offset * obs_len..(offset + 1) * obs_len];

                while trees[i].root_visits() < enodes && !trees[i].select(slot) {}

                if trees[i].root_visits() < enodes {
                    targets.push(i);
                    break;
                }

                let action = trees[i].pick(0.0);
                trees[i].push(action).expect("picked action has a root child");

                if let Some(term) = trees[i].env_mut().terminal() {
                    score.record(term.value, candidate_turn[i]);
                    info!(
                        worker = worker_id,
                        game = score.games(),
                        result = term.value * candidate_turn[i],
                        score = %format!("{:.0}%", score.percentage()),
                        "evaluation game finished"
                    );

                    // rotate roles for the next game on this tree
                    candidate_turn[i] = -candidate_turn[i];
                    trees[i].reset();

                    if let Some(decided) = score.early_verdict() {
                        info!(worker = worker_id, accepted = decided, "evaluation decided early");
                        return decided;
                    }
                    if score.finished() {
                        let accepted = score.verdict();
                        info!(
                            worker = worker_id,
                            accepted,
                            score = %format!("{:.0}%", score.percentage()),
                            target = settings.evaluate_target_pct,
                            "evaluation finished"
                        );
                        return accepted;
                    }
                }
            }
        }

        if !cur_targets.is_empty() {
            current.infer(
                &cur_inputs[..cur_targets.len() * obs_len],
                cur_targets.len(),
                &mut policy,
                &mut value,
            );
            for (k, &i) in cur_targets.iter().enumerate() {
                trees[i].expand(&policy[k * policy_len..(k + 1) * policy_len], value[k], true);
            }
        }

        if !cd_targets.is_empty() {
            candidate.infer(
                &cd_inputs[..cd_targets.len() * obs_len],
                cd_targets.len(),
                &mut policy,
                &mut value,
            );
            for (k, &i) in cd_targets.iter().enumerate() {
                trees[i].expand(&policy[k * policy_len..(k + 1) * policy_len], value[k], true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MatchScore;

    #[test]
    fn perfect_candidate_is_accepted() {
        let mut score = MatchScore::new(4, 54.0);
        for _ in 0..4 {
            // candidate plays white (+1) and white always wins
            score.record(1.0, 1.0);
        }
        assert!(score.finished());
        assert_eq!(score.percentage(), 100.0);
        assert!(score.verdict());
    }

    #[test]
    fn early_accept_once_target_is_unreachable_for_failure() {
        let mut score = MatchScore::new(10, 50.0);
        for _ in 0..5 {
            score.record(1.0, 1.0);
        }
        // 5 points out of a 5-point target
        assert_eq!(score.early_verdict(), Some(true));
    }

    #[test]
    fn early_reject_when_target_is_out_of_reach() {
        let mut score = MatchScore::new(10, 60.0);
        for _ in 0..5 {
            // candidate loses every game
            score.record(1.0, -1.0);
        }
        // even winning all 5 remaining games only yields 5 < 6 points
        assert_eq!(score.early_verdict(), Some(false));
    }

    #[test]
    fn draws_count_half() {
        let mut score = MatchScore::new(2, 50.0);
        score.record(0.0, 1.0);
        score.record(0.0, -1.0);
        assert_eq!(score.percentage(), 50.0);
        assert!(score.verdict());
    }

    #[test]
    fn undecided_mid_match() {
        let mut score = MatchScore::new(10, 50.0);
        score.record(1.0, 1.0);
        score.record(1.0, -1.0);
        assert_eq!(score.early_verdict(), None);
    }
}
