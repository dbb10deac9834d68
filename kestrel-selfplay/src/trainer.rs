//! Trainer worker: waits for the replay buffer to reach its target, trains a
//! candidate on a clone of the current model, runs the gating match and
//! promotes accepted generations.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use kestrel_core::network::TrainBatch;

use crate::evaluator::evaluate;
use crate::server::{ServerState, StatusCode};

pub fn trainer_main(id: usize, state: Arc<ServerState>) {
    info!(worker = id, "starting trainer");

    if let Err(e) = trainer_loop(id, &state) {
        error!(worker = id, "trainer failed: {:#}", e);
        state.status.set_message(format!("trainer {} failed: {:#}", id, e));
    }

    info!(worker = id, "stopping trainer");
}

fn trainer_loop(id: usize, state: &ServerState) -> anyhow::Result<()> {
    let settings = &state.settings;

    let capacity = state.buffer.len() as u64;
    let target_incr = capacity * settings.rpb_train_pct / 100;
    let samples = (capacity * settings.training_sample_pct / 100) as usize;

    let mut target_count = capacity;
    let mut target_from = 0u64;

    let opts = settings.train_options();
    if opts.detect_anomaly && id == 0 {
        info!("anomaly detection enabled");
    }

    let mut rng = StdRng::from_entropy();
    let mut batch = TrainBatch::zeroed(samples, state.model.obs_len(), state.model.policy_len());

    while state.status.code() == StatusCode::Running {
        let count = state.buffer.count();

        if count < target_count {
            if id == 0 {
                let partials = state
                    .partials
                    .iter()
                    .map(|p| p.load(Ordering::Acquire))
                    .collect_vec();
                let span = (target_count - target_from).max(1);
                info!(
                    generation = state.model.generation(),
                    progress = %format!(
                        "{}% [{} / {}]",
                        100 * count.saturating_sub(target_from) / span,
                        count.saturating_sub(target_from),
                        target_count - target_from,
                    ),
                    ?partials,
                    "waiting for replay buffer"
                );
            }
            std::thread::sleep(Duration::from_millis(1000));
            continue;
        }

        info!(
            worker = id,
            generation = state.model.generation(),
            samples,
            window = capacity,
            "training candidate"
        );

        // train on a deep copy so inference continues uninterrupted
        let mut candidate = state.model.clone_model();
        state.buffer.select_batch(&mut rng, &mut batch);
        candidate.train(&batch, &opts);

        let accepted = match catch_unwind(AssertUnwindSafe(|| {
            evaluate(&state.model, &mut candidate, id, settings)
        })) {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!(worker = id, "evaluation failed, rejecting candidate");
                false
            }
        };

        if accepted {
            let path = Path::new(&settings.model_path);
            candidate
                .save(path)
                .context("writing accepted candidate checkpoint")?;
            state.model.load(path).context("promoting accepted candidate")?;

            info!(
                worker = id,
                generation = state.model.generation(),
                "candidate accepted"
            );

            if settings.flush_old_rpb {
                state.buffer.clear();
            }

            target_count = capacity.max(state.buffer.count() + target_incr);
            target_from = state.buffer.count();
            continue;
        }

        info!(
            worker = id,
            generation = state.model.generation(),
            "candidate rejected"
        );
        target_from = state.buffer.count();
        target_count += target_incr;
    }

    Ok(())
}
