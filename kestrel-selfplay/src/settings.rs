//! The configuration surface. All keys are read once at start-up from an
//! optional JSON options file; a missing or malformed file logs a warning and
//! falls back to the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use kestrel_core::network::TrainOptions;
use kestrel_core::zero::tree::SearchParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    // worker pools
    pub inference_threads: usize,
    pub training_threads: usize,

    // self-play search
    pub selfplay_batch: usize,
    pub selfplay_nodes: u64,

    // replay buffer and training
    pub replaybuffer_size: usize,
    pub rpb_train_pct: u64,
    pub training_sample_pct: u64,
    pub training_batchsize: usize,
    pub training_mlr: f32,
    pub training_epochs: usize,
    pub training_detect_anomaly: bool,

    // tree search
    pub cpuct: f32,
    pub force_expand_unvisited: bool,
    pub unvisited_node_value_pct: i32,
    pub bootstrap_weight: u32,
    pub bootstrap_window: f32,
    pub bootstrap_amp_pct: i32,
    pub scale_cpuct_by_actions: bool,
    pub mcts_noise_alpha: f32,
    pub mcts_noise_weight: f32,

    // root sampling temperature curve
    pub selfplay_alpha_initial: f32,
    pub selfplay_alpha_decay: f32,
    pub selfplay_alpha_final: f32,
    pub selfplay_alpha_cutoff: usize,

    pub draw_value_pct: i32,
    pub flush_old_trees: bool,
    pub flush_old_rpb: bool,

    // gating matches
    pub evaluate_batch: usize,
    pub evaluate_games: u32,
    pub evaluate_nodes: u64,
    pub evaluate_target_pct: u32,

    pub model_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            inference_threads: 1,
            training_threads: 1,

            selfplay_batch: 16,
            selfplay_nodes: 512,

            replaybuffer_size: 512,
            rpb_train_pct: 40,
            training_sample_pct: 60,
            training_batchsize: 16,
            training_mlr: 0.001,
            training_epochs: 4,
            training_detect_anomaly: false,

            cpuct: 1.0,
            force_expand_unvisited: false,
            unvisited_node_value_pct: 100,
            bootstrap_weight: 0,
            bootstrap_window: 1600.0,
            bootstrap_amp_pct: 75,
            scale_cpuct_by_actions: false,
            mcts_noise_alpha: 0.3,
            mcts_noise_weight: 0.05,

            selfplay_alpha_initial: 1.0,
            selfplay_alpha_decay: 1.0,
            selfplay_alpha_final: 1.0,
            selfplay_alpha_cutoff: 1,

            draw_value_pct: 50,
            flush_old_trees: true,
            flush_old_rpb: true,

            evaluate_batch: 16,
            evaluate_games: 40,
            evaluate_nodes: 512,
            evaluate_target_pct: 54,

            model_path: "model.ckpt".to_string(),
        }
    }
}

impl Settings {
    /// Load from a JSON options file, falling back to defaults on any error.
    pub fn load(path: Option<&Path>) -> Settings {
        let path = match path {
            Some(path) => path,
            None => return Settings::default(),
        };

        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("malformed options file {}: {}, using defaults", path.display(), e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("cannot read options file {}: {}, using defaults", path.display(), e);
                Settings::default()
            }
        }
    }

    /// Training value assigned to drawn games, in `[-1, 1]`.
    pub fn draw_value(&self) -> f32 {
        (self.draw_value_pct as f32 / 100.0) * 2.0 - 1.0
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            cpuct: self.cpuct,
            force_expand_unvisited: self.force_expand_unvisited,
            unvisited_value: self.unvisited_node_value_pct as f32 / 100.0,
            bootstrap_weight: self.bootstrap_weight as f32 / 100.0,
            bootstrap_window: self.bootstrap_window,
            bootstrap_amp: self.bootstrap_amp_pct as f32 / 100.0,
            scale_cpuct_by_actions: self.scale_cpuct_by_actions,
            noise_alpha: self.mcts_noise_alpha,
            noise_weight: self.mcts_noise_weight,
        }
    }

    /// Search parameters for gating matches. The same knobs as self-play;
    /// evaluation disables the bootstrap through the expansion flag, not here.
    pub fn eval_search_params(&self) -> SearchParams {
        self.search_params()
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            learning_rate: self.training_mlr,
            epochs: self.training_epochs,
            batch_size: self.training_batchsize,
            detect_anomaly: self.training_detect_anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_convert_percentages() {
        let settings = Settings::default();
        assert_eq!(settings.draw_value(), 0.0);
        assert_eq!(settings.search_params().unvisited_value, 1.0);
        assert_eq!(settings.search_params().bootstrap_amp, 0.75);
        assert_eq!(settings.eval_search_params().cpuct, settings.search_params().cpuct);
    }

    #[test]
    fn partial_json_overrides() {
        let settings: Settings =
            serde_json::from_str(r#"{ "selfplay_batch": 4, "draw_value_pct": 0 }"#).unwrap();
        assert_eq!(settings.selfplay_batch, 4);
        assert_eq!(settings.draw_value(), -1.0);
        assert_eq!(settings.selfplay_nodes, 512);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/kestrel.json")));
        assert_eq!(settings.selfplay_batch, Settings::default().selfplay_batch);
    }
}
