//! Full-game codec properties: every legal move round-trips through the
//! policy index space at every ply of a random self-play game.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shakmaty::Position;

use kestrel_core::chess::{codec, ChessEnv, POLICY_SIZE};
use kestrel_core::env::Env;

#[test]
fn random_selfplay_roundtrips_every_move() {
    let mut rng = StdRng::seed_from_u64(42);

    for game in 0..3 {
        let mut env = ChessEnv::default();
        let mut plies = 0;

        while env.terminal().is_none() {
            let pos = env.position().clone();

            for m in pos.legal_moves() {
                let action = codec::move_to_action(&pos, &m);
                assert!(
                    action < POLICY_SIZE,
                    "game {}: move {} encodes out of range",
                    game,
                    m
                );
                assert_eq!(
                    codec::action_to_move(&pos, action),
                    Some(m.clone()),
                    "game {}: move {} does not roundtrip in {}",
                    game,
                    m,
                    env.fen()
                );
            }

            let actions = env.actions().to_vec();
            let action = actions[rng.gen_range(0..actions.len())];
            env.push(action);

            plies += 1;
            assert!(plies <= 500, "game {} did not terminate", game);
        }
    }
}

#[test]
fn distinct_moves_get_distinct_actions() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut env = ChessEnv::default();

    for _ in 0..60 {
        if env.terminal().is_some() {
            break;
        }

        let mut actions = env.actions().to_vec();
        let picked = actions[rng.gen_range(0..actions.len())];
        actions.sort_unstable();
        actions.dedup();
        assert_eq!(actions.len(), env.actions().len(), "duplicate action in {}", env.fen());

        env.push(picked);
    }
}
